use lockstep_input_store::{InputStore, InputStoreError, TickInputs};
use lockstep_tick::{PlayerId, Tick};

fn inputs(pairs: &[(u16, &str)]) -> TickInputs<String> {
    pairs
        .iter()
        .map(|(id, v)| (PlayerId::new(*id), v.to_string()))
        .collect()
}

#[test_log::test]
fn seeded_with_tick_zero() {
    let store: InputStore<String> = InputStore::new();
    assert_eq!(store.lookup_auth(Tick::new(0)), Some(&TickInputs::new()));
    assert_eq!(store.max_auth_key(), Tick::new(0));
}

#[test_log::test]
fn duplicate_auth_insert_is_rejected() {
    let mut store: InputStore<String> = InputStore::new();
    store
        .insert_auth(Tick::new(1), inputs(&[(1, "a")]))
        .unwrap();
    let err = store
        .insert_auth(Tick::new(1), inputs(&[(1, "b")]))
        .unwrap_err();
    assert!(matches!(err, InputStoreError::DuplicateAuth { tick } if tick == Tick::new(1)));
    // the original value must be preserved
    assert_eq!(
        store.lookup_auth(Tick::new(1)).unwrap().get(&PlayerId::new(1)),
        Some(&"a".to_string())
    );
}

#[test_log::test]
fn hint_self_always_wins() {
    let mut store: InputStore<String> = InputStore::new();
    let me = PlayerId::new(9);
    store.insert_hint_one(Tick::new(5), me, "up".to_string());
    // server claims player 9 pressed "down" too -- our own hint wins
    store.merge_hint(Tick::new(5), inputs(&[(9, "down"), (2, "left")]), Some(me));
    let hints = store.lookup_hint(Tick::new(5)).unwrap();
    assert_eq!(hints.get(&me), Some(&"up".to_string()));
    assert_eq!(hints.get(&PlayerId::new(2)), Some(&"left".to_string()));
}

#[test_log::test]
fn missing_ticks_between_auth_and_max_key() {
    let mut store: InputStore<String> = InputStore::new();
    store
        .insert_auth(Tick::new(10), inputs(&[(1, "a")]))
        .unwrap();
    let missing = store.missing_auth_ticks(Tick::new(0));
    assert_eq!(missing, (1..10).map(Tick::new).collect::<Vec<_>>());
}
