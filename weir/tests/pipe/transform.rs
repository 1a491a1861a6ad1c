use bytes::Bytes;
use std::{cell::Cell, rc::Rc};
use weir::{Cfg, PassThrough, Readable, Scheduler, StreamError, Transform, Writable};

use crate::{consume, objs, Collect, Events, Obj};

#[test]
fn pass_through_chain() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg::object());
    let middle: PassThrough<Obj> = Transform::pass_through(&sched, Cfg::object());
    let sink = Collect::new();
    let dst = Writable::new(&sched, Cfg::object(), sink.clone());

    src.pipe(&middle).pipe(&dst);
    for i in 1..=3 {
        src.push(Obj(i)).unwrap();
    }
    src.push_eof().unwrap();
    sched.run_until_idle();

    assert_eq!(sink.chunks(), objs(1..=3));
    assert!(dst.is_finished());
    assert!(middle.writable().is_finished());
    assert!(middle.readable().is_ended());
    assert!(middle.is_closed());
    assert!(sched.registry().is_empty());
}

#[test]
fn sized_round_trip() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg::default().with_high_water_mark(8));
    let middle: PassThrough<Bytes> = Transform::pass_through(&sched, Cfg::default().with_high_water_mark(8));
    let sink = Collect::new();
    let dst = Writable::new(&sched, Cfg::default().with_high_water_mark(8), sink.clone());

    let input: Vec<Bytes> = (0..20u8)
        .map(|i| Bytes::from(vec![b'a' + i; usize::from(i * 5 % 13 + 1)]))
        .collect();
    let total: usize = input.iter().map(Bytes::len).sum();
    assert!(input.iter().any(|chunk| chunk.len() > 8));

    src.pipe(&middle).pipe(&dst);
    for chunk in &input {
        src.push(chunk.clone()).unwrap();
    }
    src.push_eof().unwrap();
    sched.run_until_idle();

    let output = sink.chunks();
    assert_eq!(output, input);
    assert_eq!(output.iter().map(Bytes::len).sum::<usize>(), total);
    assert_eq!(output.concat(), input.concat());
    assert!(dst.is_finished());
    assert!(middle.is_closed());
}

#[test]
fn map_and_flush() {
    crate::init();

    let sched = Scheduler::new();
    let sum = Rc::new(Cell::new(0));
    let s = sum.clone();
    let odd_tens: Transform<Obj> = Transform::with_flush(
        &sched,
        Cfg::object(),
        move |obj: Obj| {
            s.set(s.get() + obj.0);
            Ok((obj.0 % 2 == 1).then(|| Obj(obj.0 * 10)))
        },
        move || Ok(Some(Obj(sum.get()))),
    );
    let received = consume(odd_tens.readable());

    for i in 1..=4 {
        odd_tens.write(Obj(i)).unwrap();
    }
    odd_tens.end().unwrap();
    sched.run_until_idle();

    assert_eq!(*received.borrow(), vec![Obj(10), Obj(30), Obj(10)]);
    assert!(odd_tens.readable().is_ended());
    assert!(odd_tens.is_closed());
}

#[test]
fn map_error_destroys() {
    crate::init();

    let sched = Scheduler::new();
    let checked: Transform<Obj> = Transform::new(&sched, Cfg::object(), |obj: Obj| {
        if obj.0 > 1 {
            Err(StreamError::producer("out of range"))
        } else {
            Ok(Some(obj))
        }
    });
    let events = Events::new();
    let e = events.clone();
    checked.on_error(move |err| e.push(format!("error: {}", err)));
    let e = events.clone();
    checked.on_close(move || e.push("close"));

    checked.write(Obj(1)).unwrap();
    checked.write(Obj(2)).unwrap();
    sched.run_until_idle();

    assert_eq!(checked.writable().errored(), Some(StreamError::Producer("out of range".into())));
    assert_eq!(events.get(), vec!["error: producer error: out of range", "close"]);
}

#[test]
fn backpressure_through_transform() {
    crate::init();

    let sched = Scheduler::new();
    let pt: PassThrough<Obj> = Transform::pass_through(&sched, Cfg::object().with_high_water_mark(1));
    let events = Events::watch_writable(pt.writable());

    assert!(!pt.write(Obj(1)).unwrap());
    assert!(!pt.write(Obj(2)).unwrap());
    sched.run_until_idle();

    println!("Readable side full, second write held back");
    assert_eq!(pt.readable().len(), 1);
    assert_eq!(pt.writable().len(), 2);

    assert_eq!(pt.read(None), Some(Obj(1)));
    sched.run_until_idle();
    assert_eq!(pt.readable().len(), 1);
    assert_eq!(pt.writable().len(), 1);
    assert_eq!(events.count("drain"), 0);

    assert_eq!(pt.read(None), Some(Obj(2)));
    sched.run_until_idle();
    assert!(pt.writable().is_empty());
    assert_eq!(events.get(), vec!["drain"]);
}
