use hexsim_smp::{LockKind, LockState, Machine, MachineConfig, MachineState, UnlockOutcome};
use proptest::prelude::*;

const THREADS: usize = 6;

#[derive(Debug, Clone, Copy)]
enum Action {
    Lock(usize, LockKind),
    Unlock(usize, LockKind),
}

fn kind_strategy() -> impl Strategy<Value = LockKind> {
    prop_oneof![Just(LockKind::Tlb), Just(LockKind::K0)]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..THREADS, kind_strategy()).prop_map(|(t, k)| Action::Lock(t, k)),
        (0..THREADS, kind_strategy()).prop_map(|(t, k)| Action::Unlock(t, k)),
    ]
}

fn holders(state: &MachineState, kind: LockKind) -> usize {
    state
        .threads()
        .iter()
        .filter(|t| matches!(t.lock_state(kind), LockState::Owner | LockState::Queued))
        .count()
}

fn expected_successor(state: &MachineState, kind: LockKind, releaser: usize) -> Option<usize> {
    (1..THREADS)
        .map(|k| (releaser + k) % THREADS)
        .find(|&t| state.thread(t).lock_state(kind) == LockState::Waiting)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]
    #[test]
    fn locks_stay_exclusive_fair_and_starvation_free(
        actions in prop::collection::vec(action_strategy(), 1..200),
    ) {
        let machine = Machine::new(MachineConfig::with_threads(THREADS)).unwrap();
        let mut state = machine.state();
        state.start_threads(None, (1 << THREADS) - 1);

        for action in actions {
            match action {
                Action::Lock(tid, kind) => {
                    // Only a runnable thread executes instructions. Re-locking an owned lock
                    // hangs the thread, and nesting the two locks in both orders deadlocks,
                    // so threads hold at most one lock at a time.
                    let thread = state.thread(tid);
                    let other = LockKind::ALL.into_iter().find(|&k| k != kind).unwrap();
                    let holds_other = matches!(
                        thread.lock_state(other),
                        LockState::Owner | LockState::Queued
                    );
                    if thread.is_runnable() && thread.lock_state(kind) != LockState::Owner && !holds_other {
                        state.lock(tid, kind);
                    }
                }
                Action::Unlock(tid, kind) => {
                    if !state.thread(tid).is_runnable() {
                        continue;
                    }
                    let expected = expected_successor(&state, kind, tid);
                    let owner = state.thread(tid).lock_state(kind) == LockState::Owner;
                    match state.unlock(tid, kind) {
                        UnlockOutcome::Released { next } => {
                            prop_assert!(owner);
                            prop_assert_eq!(next, expected);
                        }
                        UnlockOutcome::NotOwner => prop_assert!(!owner),
                    }
                }
            }
            for kind in LockKind::ALL {
                prop_assert!(holders(&state, kind) <= 1);
            }
        }

        // Drain: every thread finishes whatever it is waiting for, round-robin, like the
        // execution core would. Every waiter must get the lock within a bounded number of
        // rounds.
        for _round in 0..(4 * THREADS) {
            for tid in 0..THREADS {
                if !state.thread(tid).is_runnable() {
                    continue;
                }
                for kind in LockKind::ALL {
                    match state.thread(tid).lock_state(kind) {
                        LockState::Queued => {
                            state.lock(tid, kind);
                        }
                        LockState::Owner => {
                            state.unlock(tid, kind);
                        }
                        LockState::Waiting | LockState::Unlocked => {}
                    }
                }
            }
        }
        for tid in 0..THREADS {
            for kind in LockKind::ALL {
                prop_assert_eq!(state.thread(tid).lock_state(kind), LockState::Unlocked);
            }
            prop_assert!(state.thread(tid).is_runnable());
        }
    }
}
