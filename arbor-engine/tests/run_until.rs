// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use arbor_engine::test_helpers::start_test;

mod common;
use common::{create_once_event_at_delay, spawn_activity};

#[test]
fn run_until_once() {
    let mut engine = start_test(file!());

    let once = create_once_event_at_delay(&mut engine, 5, 1);

    spawn_activity(&mut engine);
    engine.run_until(once).unwrap();

    assert_eq!(engine.time_now_ns(), 5.0);
}

#[test]
fn once_only_fires_once() {
    let mut engine = start_test(file!());

    let once = create_once_event_at_delay(&mut engine, 2, ());
    {
        let once = once.clone();
        let clock = engine.default_clock();
        engine.spawn(async move {
            clock.wait_ticks(3).await;
            once.notify()
        });
    }

    match engine.run() {
        Ok(()) => panic!("Expected an error!"),
        Err(e) => assert_eq!(format!("{e}"), "Error: once event already triggered"),
    }
}
