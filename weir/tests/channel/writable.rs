use std::{cell::RefCell, rc::Rc};
use weir::{Cfg, Done, FnSink, ProtocolViolation, Scheduler, Sink, StreamError, Writable, WritableState};

use crate::{objs, Collect, Events, Held, Obj};

#[test]
fn backpressure_and_single_drain() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object().with_high_water_mark(2), held.clone());
    let events = Events::watch_writable(&dst);

    assert!(dst.write(Obj(1)).unwrap());
    assert!(!dst.write(Obj(2)).unwrap());
    assert!(!dst.write(Obj(3)).unwrap());
    assert!(dst.need_drain());
    assert_eq!(dst.len(), 3);

    println!("Only one write is handed to the sink at a time");
    sched.run_until_idle();
    assert_eq!(held.chunks(), vec![Obj(1)]);
    assert_eq!(held.pending(), 1);
    assert!(events.get().is_empty());

    assert!(held.complete_one());
    sched.run_until_idle();
    assert_eq!(held.chunks(), objs(1..=2));
    assert_eq!(events.count("drain"), 0);

    assert!(held.complete_one());
    sched.run_until_idle();
    assert_eq!(events.count("drain"), 0);

    println!("Completing the last write drains");
    assert!(held.complete_one());
    sched.run_until_idle();
    assert_eq!(held.chunks(), objs(1..=3));
    assert_eq!(events.get(), vec!["drain"]);
    assert!(!dst.need_drain());
    assert!(dst.is_empty());
}

#[test]
fn no_drain_without_backpressure() {
    crate::init();

    let sched = Scheduler::new();
    let sink = Collect::new();
    let dst = Writable::new(&sched, Cfg::object(), sink.clone());
    let events = Events::watch_writable(&dst);

    for i in 1..=3 {
        assert!(dst.write(Obj(i)).unwrap());
    }
    sched.run_until_idle();
    assert_eq!(sink.chunks(), objs(1..=3));
    assert!(events.get().is_empty());
}

#[test]
fn sized_length_accounting() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::default().with_high_water_mark(8), held.clone());
    assert!(!dst.is_object_mode());
    assert_eq!(dst.high_water_mark(), 8);

    assert!(dst.write(b"abcde".to_vec()).unwrap());
    assert!(!dst.write(b"fgh".to_vec()).unwrap());
    assert_eq!(dst.len(), 8);

    held.complete_one();
    assert_eq!(dst.len(), 3);
    held.complete_one();
    assert_eq!(dst.len(), 0);
}

#[test]
fn end_finishes_once() {
    crate::init();

    struct Finalizing {
        written: Rc<RefCell<Vec<Obj>>>,
        finalized: Rc<RefCell<usize>>,
    }

    impl Sink<Obj> for Finalizing {
        fn write(&mut self, chunk: Obj, done: Done) {
            self.written.borrow_mut().push(chunk);
            done.ok()
        }

        fn finalize(&mut self, done: Done) {
            *self.finalized.borrow_mut() += 1;
            done.ok()
        }
    }

    let sched = Scheduler::new();
    let written = Rc::new(RefCell::new(Vec::new()));
    let finalized = Rc::new(RefCell::new(0));
    let dst = Writable::new(
        &sched,
        Cfg::object(),
        Finalizing { written: written.clone(), finalized: finalized.clone() },
    );
    let events = Events::watch_writable(&dst);

    dst.write(Obj(1)).unwrap();
    dst.end_with(Obj(2)).unwrap();
    assert_eq!(dst.state(), WritableState::Finishing);
    println!("Repeated end is accepted");
    dst.end().unwrap();
    assert!(!dst.is_finished(), "finished synchronously");

    sched.run_until_idle();
    assert_eq!(*written.borrow(), objs(1..=2));
    assert_eq!(*finalized.borrow(), 1);
    assert_eq!(events.get(), vec!["finish", "close"]);
    assert!(dst.is_finished());
    assert_eq!(dst.state(), WritableState::Finished);

    assert_eq!(dst.end(), Err(StreamError::Protocol(ProtocolViolation::AlreadyFinished)));
}

#[test]
fn end_waits_for_pending_write() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object(), held.clone());
    let events = Events::watch_writable(&dst);
    let result = Rc::new(RefCell::new(None));

    dst.write(Obj(1)).unwrap();
    let r = result.clone();
    dst.end_and_then(None, move |res| *r.borrow_mut() = Some(res)).unwrap();

    sched.run_until_idle();
    assert!(events.get().is_empty());
    assert!(result.borrow().is_none());

    held.complete_one();
    sched.run_until_idle();
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert_eq!(events.get(), vec!["finish", "close"]);
}

#[test]
fn write_after_end() {
    crate::init();

    let sched = Scheduler::new();
    let dst = Writable::new(&sched, Cfg::object(), Collect::new());
    let called = Rc::new(RefCell::new(false));

    dst.end().unwrap();
    assert!(!dst.is_writable());
    assert_eq!(dst.write(Obj(1)), Err(StreamError::Protocol(ProtocolViolation::WriteAfterEnd)));

    let c = called.clone();
    let res = dst.write_with(Obj(2), move |_| *c.borrow_mut() = true);
    assert_eq!(res, Err(StreamError::Protocol(ProtocolViolation::WriteAfterEnd)));
    assert_eq!(dst.end_with(Obj(3)), Err(StreamError::Protocol(ProtocolViolation::WriteAfterEnd)));

    sched.run_until_idle();
    assert!(!*called.borrow(), "callback of rejected write invoked");
}

#[test]
fn write_callbacks_in_order() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object(), held.clone());
    let events = Events::new();

    for i in 1..=3 {
        let e = events.clone();
        dst.write_with(Obj(i), move |res| e.push(format!("cb {} {:?}", i, res))).unwrap();
    }
    while held.complete_one() {
        sched.run_until_idle();
    }
    sched.run_until_idle();

    assert_eq!(events.get(), vec!["cb 1 Ok(())", "cb 2 Ok(())", "cb 3 Ok(())"]);
}

#[test]
fn cork_batches_writes() {
    crate::init();

    #[derive(Clone, Default)]
    struct Batching {
        singles: Rc<RefCell<Vec<Obj>>>,
        batches: Rc<RefCell<Vec<Vec<Obj>>>>,
    }

    impl Sink<Obj> for Batching {
        fn write(&mut self, chunk: Obj, done: Done) {
            self.singles.borrow_mut().push(chunk);
            done.ok()
        }

        fn supports_batch(&self) -> bool {
            true
        }

        fn write_batch(&mut self, chunks: Vec<Obj>, done: Done) {
            self.batches.borrow_mut().push(chunks);
            done.ok()
        }
    }

    let sched = Scheduler::new();
    let sink = Batching::default();
    let dst = Writable::new(&sched, Cfg::object(), sink.clone());

    dst.cork();
    dst.cork();
    assert_eq!(dst.state(), WritableState::Corked);
    for i in 1..=3 {
        dst.write(Obj(i)).unwrap();
    }

    dst.uncork();
    assert_eq!(dst.corked(), 1);
    sched.run_until_idle();
    assert!(sink.batches.borrow().is_empty());
    assert!(sink.singles.borrow().is_empty());

    println!("Fully uncorked");
    dst.uncork();
    sched.run_until_idle();
    assert_eq!(*sink.batches.borrow(), vec![objs(1..=3)]);
    assert!(sink.singles.borrow().is_empty());
    assert!(dst.is_empty());

    println!("Single write goes through write");
    dst.write(Obj(4)).unwrap();
    sched.run_until_idle();
    assert_eq!(*sink.singles.borrow(), vec![Obj(4)]);
}

#[test]
fn uncork_without_batching() {
    crate::init();

    let sched = Scheduler::new();
    let sink = Collect::new();
    let dst = Writable::new(&sched, Cfg::object(), sink.clone());

    dst.cork();
    dst.write(Obj(1)).unwrap();
    dst.write(Obj(2)).unwrap();
    sched.run_until_idle();
    assert!(sink.chunks().is_empty());

    println!("End uncorks");
    dst.end().unwrap();
    sched.run_until_idle();
    assert_eq!(sink.chunks(), objs(1..=2));
    assert!(dst.is_finished());
}

#[test]
fn sink_error_destroys() {
    crate::init();

    let sched = Scheduler::new();
    let dst = Writable::new(
        &sched,
        Cfg::object(),
        FnSink(|chunk: Obj, done: Done| {
            if chunk.0 == 2 {
                done.fail(StreamError::consumer("disk full"))
            } else {
                done.ok()
            }
        }),
    );
    let events = Events::watch_writable(&dst);
    let results = Events::new();

    for i in 1..=2 {
        let r = results.clone();
        dst.write_with(Obj(i), move |res| r.push(format!("{} {:?}", i, res))).unwrap();
    }

    sched.run_until_idle();
    assert_eq!(results.get(), vec!["1 Ok(())".to_string(), format!("2 {:?}", Err::<(), _>(StreamError::consumer("disk full")))]);
    assert_eq!(events.get(), vec!["error: consumer error: disk full", "close"]);
    assert_eq!(dst.errored(), Some(StreamError::Consumer("disk full".into())));
    assert_eq!(dst.state(), WritableState::Errored);
    assert_eq!(dst.write(Obj(3)), Err(StreamError::Protocol(ProtocolViolation::WriteAfterDestroy)));
}

#[test]
fn late_sink_error() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object(), held.clone());
    let events = Events::watch_writable(&dst);

    dst.write(Obj(1)).unwrap();
    dst.write(Obj(2)).unwrap();
    assert!(held.fail_one(StreamError::consumer("broken")));
    sched.run_until_idle();

    assert_eq!(held.chunks(), vec![Obj(1)], "buffered write handed to failed sink");
    assert_eq!(events.get(), vec!["error: consumer error: broken", "close"]);
}

#[test]
fn destroy_aborts_pending_writes() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object(), held.clone());
    let events = Events::watch_writable(&dst);
    let results = Events::new();

    for i in 1..=2 {
        let r = results.clone();
        dst.write_with(Obj(i), move |res| r.push(format!("{} {:?}", i, res))).unwrap();
    }
    let r = results.clone();
    dst.end_and_then(None, move |res| r.push(format!("end {:?}", res))).unwrap();

    dst.destroy(None);
    assert!(dst.is_destroyed());
    assert!(results.get().is_empty());

    sched.run_until_idle();
    assert_eq!(results.get(), vec!["1 Err(Destroyed)", "2 Err(Destroyed)", "end Err(Destroyed)"]);
    assert_eq!(events.get(), vec!["close"]);

    println!("Late completion is ignored");
    assert!(held.complete_one());
    sched.run_until_idle();
    assert_eq!(results.get().len(), 3);
    assert_eq!(events.get(), vec!["close"]);
    assert_eq!(dst.end(), Err(StreamError::Protocol(ProtocolViolation::EndAfterDestroy)));
}
