/*
Per-request cost of the dispatcher in isolation: name resolution across the five vehicle
controllers plus the store or action call, without any transport. Unqualified names that
live in the last controller show the cost of the registration-order scan; qualified names
skip it.
*/

use criterion::{Criterion, criterion_group, criterion_main};

use ev_systems::{
    Controller, ControllerRegistry, Dispatcher, LocalChannel, Request, Subsystem, Value,
    controller::{
        backup::Backup, battery::Battery, climate::Climate, motor::Motor, proximity::Proximity,
    },
    feed::{
        bus::SimulatedBus,
        noise::{NoiseChannel, NoiseFeed},
    },
    utils::metrics::Metrics,
};
use std::{hint::black_box, sync::Arc, time::Duration};

fn dispatcher() -> Dispatcher {
    let bus = Arc::new(SimulatedBus::new(Box::new(NoiseFeed::new(vec![
        NoiseChannel::int("speed", 3.0, (0.0, 0.0)),
        NoiseChannel::int("distance", 100.0, (0.0, 0.0)),
    ]))));
    let subsystems: Vec<Box<dyn Subsystem>> = vec![
        Box::new(Motor::with_feed(None)),
        Box::new(Battery::with_feed(None)),
        Box::new(Climate::with_feed(bus.clone(), None)),
        Box::new(Proximity::with_feed(None)),
        Box::new(Backup::new(bus)),
    ];

    let metrics = Metrics::shared();
    let mut registry = ControllerRegistry::new();
    for s in subsystems {
        let c = Arc::new(Controller::new(s, metrics.clone()));
        c.start(Duration::from_millis(16)).expect("controller start");
        registry.add(c).expect("unique identity");
    }
    Dispatcher::new(Arc::new(registry), Arc::new(LocalChannel::new()), metrics)
}

fn bench_dispatch(c: &mut Criterion) {
    let d = dispatcher();
    let mut group = c.benchmark_group("dispatch");

    let cases = [
        ("get_first_controller", Request::get("speed")),
        ("get_last_controller", Request::get("distance")),
        ("get_qualified", Request::get("backup.distance")),
        ("set", Request::set("battery.voltage", 400i64)),
        ("set_type_mismatch", Request::set("battery.voltage", 1.5)),
        ("action", Request::action("nearestObstacle", vec![])),
        ("unknown_name", Request::get("warpDrive")),
    ];
    for (label, req) in cases {
        group.bench_function(label, |b| b.iter(|| black_box(d.dispatch(black_box(req.clone())))));
    }

    group.bench_function("action_with_args", |b| {
        b.iter(|| black_box(d.handle(&Request::action("setSpeed", vec![Value::Int(42)]))))
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
