// tests/property/chunking_test.rs

//! Property-based tests for the protocol parser
//! Tests that the parse result does not depend on how the input is split

use crate::test_helpers::{Event, Recorder};
use proptest::prelude::*;
use spinelmq::core::protocol::Parser;

/// One well-formed client command, rendered to bytes.
fn command() -> impl Strategy<Value = Vec<u8>> {
    let subject = "[a-z]{1,6}(\\.[a-z*]{1,4}){0,3}";
    prop_oneof![
        Just(b"PING\r\n".to_vec()),
        Just(b"PONG\r\n".to_vec()),
        Just(b"ping\r\n".to_vec()),
        "[a-z0-9 ]{0,20}".prop_map(|name| {
            format!("CONNECT {{\"name\":\"{name}\"}}\r\n").into_bytes()
        }),
        (subject, proptest::option::of("[a-z]{1,5}"), 1u32..1000).prop_map(
            |(subject, queue, sid)| match queue {
                Some(queue) => format!("SUB {subject} {queue} {sid}\r\n").into_bytes(),
                None => format!("SUB {subject} {sid}\r\n").into_bytes(),
            }
        ),
        (
            "[a-z]{1,6}(\\.[a-z]{1,4}){0,3}",
            proptest::option::of("_INBOX\\.[a-z0-9]{1,8}"),
            prop::collection::vec(any::<u8>(), 0..300),
        )
            .prop_map(|(subject, reply, payload)| {
                let mut out = match reply {
                    Some(reply) => format!("PUB {subject} {reply} {}\r\n", payload.len()),
                    None => format!("PUB {subject} {}\r\n", payload.len()),
                }
                .into_bytes();
                out.extend_from_slice(&payload);
                out.extend_from_slice(b"\r\n");
                out
            }),
    ]
}

fn parse_whole(input: &[u8]) -> Vec<Event> {
    let mut recorder = Recorder::default();
    Parser::default().parse(input, &mut recorder).unwrap();
    recorder.events
}

fn parse_split(input: &[u8], mut cuts: Vec<usize>) -> Vec<Event> {
    cuts.iter_mut().for_each(|cut| *cut %= input.len() + 1);
    cuts.sort_unstable();
    cuts.dedup();

    let mut parser = Parser::default();
    let mut recorder = Recorder::default();
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(input.len())) {
        parser.parse(&input[start..cut], &mut recorder).unwrap();
        start = cut;
    }
    recorder.events
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_split_points_do_not_change_events(
        commands in prop::collection::vec(command(), 1..20),
        cuts in prop::collection::vec(any::<usize>(), 0..40),
    ) {
        let input = commands.concat();
        let whole = parse_whole(&input);
        prop_assert_eq!(whole.len(), commands.len());
        prop_assert_eq!(parse_split(&input, cuts), whole);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole(
        commands in prop::collection::vec(command(), 1..8),
    ) {
        let input = commands.concat();
        let cuts: Vec<usize> = (0..input.len()).collect();
        prop_assert_eq!(parse_split(&input, cuts), parse_whole(&input));
    }

    #[test]
    fn test_garbage_never_panics(
        input in prop::collection::vec(any::<u8>(), 0..512),
        cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let mut parser = Parser::new(128, 256);
        let mut recorder = Recorder::default();
        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (input.len() + 1)).collect();
        cuts.sort_unstable();
        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(input.len())) {
            // An error resets the parser; later chunks are still fed.
            let _ = parser.parse(&input[start..cut], &mut recorder);
            start = cut;
        }
    }
}

#[test]
fn test_events_preserve_payload_bytes() {
    let events = parse_whole(b"PUB a 3\r\n\x00\r\n\r\n");
    match &events[..] {
        [Event::Pub(args, payload)] => {
            assert_eq!(args.size, 3);
            assert_eq!(&payload[..], b"\x00\r\n");
        }
        other => panic!("unexpected events: {other:?}"),
    }
}
