//! Property tests for command sequences
//!
//! Whatever mix of accepted and rejected commands runs against a round, the
//! stream stays contiguous, each event names the command that produced it,
//! and replaying the stream yields the state the last command returned.

use std::sync::Arc;

use eventkeep::{Aggregate, AggregateId, EventRepository, NoopHook};
use eventkeep_integration_tests::{
    round_type, store_with_hook, RoundCommand, RoundState, TestRepository,
};
use proptest::prelude::*;

fn command_strategy() -> impl Strategy<Value = RoundCommand> {
    prop_oneof![
        (0u64..3000).prop_map(RoundCommand::start_round),
        (0u8..4, 0u64..5000).prop_map(|(input, sats)| RoundCommand::register_input(input.to_string(), sats)),
        (0u8..4).prop_map(|input| RoundCommand::unregister_input(input.to_string())),
        Just(()).prop_map(|()| RoundCommand::start_signing()),
        Just(()).prop_map(|()| RoundCommand::set_succeeded("tx")),
        Just(()).prop_map(|()| RoundCommand::set_failed("timeout")),
    ]
}

proptest! {
    #[test]
    fn prop_replay_matches_last_result(commands in prop::collection::vec(command_strategy(), 1..20)) {
        tokio_test::block_on(async {
            let repository = Arc::new(TestRepository::new());
            let store = store_with_hook(Arc::clone(&repository), Arc::new(NoopHook));
            let id = AggregateId::try_new("p").unwrap();

            let mut expected = RoundState::default();
            let mut accepted = Vec::new();
            for command in commands {
                let source_id = eventkeep::Command::idempotence_id(&command);
                match store.process_command(command, &round_type(), &id).await {
                    Ok(result) => {
                        expected = result.state;
                        accepted.extend(result.new_events.iter().map(|_| source_id));
                    }
                    Err(error) => {
                        let failed = error.as_command_failed().unwrap();
                        prop_assert_eq!(&failed.state, &expected);
                    }
                }
            }

            let events = repository.list_events(&round_type(), &id, 0, None).await.unwrap();
            let sequence_ids: Vec<_> = events.iter().map(|event| event.sequence_id).collect();
            prop_assert_eq!(sequence_ids, (1..=accepted.len() as u64).collect::<Vec<_>>());
            let sources: Vec<_> = events.iter().map(|event| event.source_id).collect();
            prop_assert_eq!(sources, accepted);

            let replayed = store.get_aggregate(&round_type(), &id).await.unwrap();
            prop_assert_eq!(replayed.state(), &expected);
            Ok(())
        })?;
    }
}
