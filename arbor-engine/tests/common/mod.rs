// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use arbor_engine::engine::Engine;
use arbor_engine::events::once::Once;

/// Spawn an activity loop that runs continually
#[allow(dead_code)]
pub fn spawn_activity(engine: &mut Engine) {
    let clock = engine.default_clock();
    engine.spawn(async move {
        loop {
            clock.wait_ticks(1).await;
        }
    });
}

// Create an event and spawn a task that will trigger it after the specified
// number of ticks.
#[allow(dead_code)]
pub fn create_once_event_at_delay<T>(engine: &mut Engine, delay: u64, value: T) -> Box<Once<T>>
where
    T: Copy + 'static,
{
    let event = Once::with_value(value);
    {
        let clock = engine.default_clock();
        let event = event.clone();
        engine.spawn(async move {
            clock.wait_ticks(delay).await;
            event.notify()?;
            Ok(())
        });
    }
    Box::new(event)
}
