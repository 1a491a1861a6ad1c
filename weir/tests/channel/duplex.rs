use weir::{Cfg, Done, Duplex, FnSink, PushSource, Scheduler, StreamError};

use crate::{consume, objs, Collect, Events, Obj};

fn watch<R: weir::Chunk, W: weir::Chunk>(duplex: &Duplex<R, W>) -> Events {
    let events = Events::new();
    let e = events.clone();
    duplex.on_error(move |err| e.push(format!("error: {}", err)));
    let e = events.clone();
    duplex.on_close(move || e.push("close"));
    events
}

#[test]
fn sides_share_identity() {
    crate::init();

    let sched = Scheduler::new();
    let duplex: Duplex<Obj> = Duplex::new(&sched, Cfg::object(), PushSource, Collect::new());
    assert_eq!(duplex.id(), duplex.readable().id());
    assert_eq!(duplex.id(), duplex.writable().id());
    assert!(duplex.allow_half_open());
}

#[test]
fn half_open() {
    crate::init();

    let sched = Scheduler::new();
    let sink = Collect::new();
    let duplex: Duplex<Obj> = Duplex::new(&sched, Cfg::object(), PushSource, sink.clone());
    let events = watch(&duplex);
    let received = consume(duplex.readable());

    duplex.push(Obj(1)).unwrap();
    duplex.push_eof().unwrap();
    sched.run_until_idle();

    println!("Readable side ended, writable side stays open");
    assert_eq!(*received.borrow(), vec![Obj(1)]);
    assert!(duplex.readable().is_ended());
    assert!(duplex.writable().is_writable());
    assert!(!duplex.readable().is_destroyed());
    assert!(events.get().is_empty());

    duplex.write(Obj(10)).unwrap();
    duplex.end().unwrap();
    sched.run_until_idle();

    assert_eq!(sink.chunks(), vec![Obj(10)]);
    assert!(duplex.writable().is_finished());
    assert!(duplex.is_destroyed());
    assert_eq!(events.get(), vec!["close"]);
    assert!(duplex.is_closed());
}

#[test]
fn readable_end_ends_writable() {
    crate::init();

    let sched = Scheduler::new();
    let sink = Collect::new();
    let cfg = Cfg { allow_half_open: false, ..Cfg::object() };
    let duplex: Duplex<Obj> = Duplex::new(&sched, cfg, PushSource, sink.clone());
    let events = watch(&duplex);
    let _received = consume(duplex.readable());

    duplex.write(Obj(5)).unwrap();
    duplex.push_eof().unwrap();
    sched.run_until_idle();

    assert_eq!(sink.chunks(), vec![Obj(5)]);
    assert!(duplex.writable().is_finished());
    assert_eq!(events.get(), vec!["close"]);
}

#[test]
fn error_destroys_both_sides() {
    crate::init();

    let sched = Scheduler::new();
    let cfg = Cfg { allow_half_open: false, ..Cfg::object() };
    let duplex: Duplex<Obj> = Duplex::new(
        &sched,
        cfg,
        PushSource,
        FnSink(|_chunk: Obj, done: Done| done.fail(StreamError::consumer("rejected"))),
    );
    let events = watch(&duplex);

    duplex.push(Obj(1)).unwrap();
    duplex.write(Obj(2)).unwrap();
    sched.run_until_idle();

    assert!(duplex.writable().is_destroyed());
    assert!(duplex.readable().is_destroyed());
    assert!(duplex.readable().is_empty());
    assert_eq!(duplex.readable().errored(), Some(StreamError::Consumer("rejected".into())));
    assert_eq!(events.get(), vec!["error: consumer error: rejected", "close"]);
}

#[test]
fn destroy_half_closed_side_only() {
    crate::init();

    let sched = Scheduler::new();
    let sink = Collect::new();
    let duplex: Duplex<Obj> = Duplex::new(&sched, Cfg::object(), PushSource, sink.clone());
    let events = watch(&duplex);

    duplex.push_eof().unwrap();
    duplex.destroy(None);
    assert!(duplex.readable().is_destroyed());
    assert!(!duplex.writable().is_destroyed());

    sched.run_until_idle();
    assert!(events.get().is_empty());

    duplex.write(Obj(1)).unwrap();
    duplex.destroy(None);
    sched.run_until_idle();
    assert_eq!(sink.chunks(), vec![Obj(1)]);
    assert!(duplex.is_destroyed());
    assert_eq!(events.get(), vec!["close"]);
}

#[test]
fn destroy_both_sides() {
    crate::init();

    let sched = Scheduler::new();
    let duplex: Duplex<Obj> = Duplex::new(&sched, Cfg::object(), PushSource, Collect::new());
    let events = watch(&duplex);

    duplex.destroy(Some(StreamError::producer("shutdown")));
    assert!(duplex.is_destroyed());
    sched.run_until_idle();

    assert_eq!(events.get(), vec!["error: producer error: shutdown", "close"]);
    assert_eq!(duplex.write(Obj(1)).map_err(|err| err.is_destroyed()), Err(true));
}

#[test]
fn pull_and_write() {
    crate::init();

    let sched = Scheduler::new();
    let sink = Collect::new();
    let duplex: Duplex<Obj> = Duplex::new(&sched, Cfg::object(), PushSource, sink.clone());

    for i in 1..=3 {
        duplex.push(Obj(i)).unwrap();
    }
    assert_eq!(duplex.read(None), Some(Obj(1)));
    assert_eq!(duplex.read(None), Some(Obj(2)));

    for i in 1..=3 {
        duplex.write(Obj(i)).unwrap();
    }
    sched.run_until_idle();
    assert_eq!(sink.chunks(), objs(1..=3));
    assert_eq!(duplex.readable().len(), 1);
}
