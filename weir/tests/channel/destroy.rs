use bytes::Bytes;
use weir::{Cfg, Done, ProtocolViolation, Readable, ReadableState, Scheduler, Source, StreamError, Writable};

use crate::{Collect, Events, Obj};

#[test]
fn close_once() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::<Obj>::new(&sched, Cfg::object());
    let events = Events::watch_readable(&src);

    src.destroy(None);
    assert!(src.is_destroyed());
    assert!(!src.is_closed());
    assert!(events.get().is_empty(), "close emitted synchronously");

    src.destroy(None);
    sched.run_until_idle();
    src.destroy(None);
    sched.run_until_idle();

    assert_eq!(events.get(), vec!["close"]);
    assert!(src.is_closed());
    assert_eq!(src.state(), ReadableState::Destroyed);
}

#[test]
fn error_before_close() {
    crate::init();

    let sched = Scheduler::new();
    let dst = Writable::<Obj>::new(&sched, Cfg::object(), Collect::new());
    let events = Events::watch_writable(&dst);

    dst.destroy(Some(StreamError::producer("upstream gone")));
    assert_eq!(dst.errored(), Some(StreamError::Producer("upstream gone".into())));

    sched.run_until_idle();
    assert_eq!(events.get(), vec!["error: producer error: upstream gone", "close"]);
}

#[test]
fn second_error_dropped() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::<Obj>::new(&sched, Cfg::object());
    let events = Events::watch_readable(&src);

    src.destroy(Some(StreamError::producer("first")));
    src.destroy(Some(StreamError::producer("second")));
    sched.run_until_idle();
    src.destroy(Some(StreamError::producer("third")));
    sched.run_until_idle();

    assert_eq!(src.errored(), Some(StreamError::Producer("first".into())));
    assert_eq!(events.get(), vec!["error: producer error: first", "close"]);
    assert_eq!(src.state(), ReadableState::Errored);
}

#[test]
fn buffered_data_discarded() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg::default());
    src.push(Bytes::from_static(b"abc")).unwrap();
    let received = crate::consume(&src);

    src.destroy(None);
    assert!(src.is_empty());
    assert_eq!(src.push(Bytes::from_static(b"d")), Err(StreamError::Protocol(ProtocolViolation::PushAfterDestroy)));
    assert_eq!(src.push_eof(), Err(StreamError::Protocol(ProtocolViolation::PushAfterDestroy)));

    sched.run_until_idle();
    assert!(received.borrow().is_empty());
    assert_eq!(src.read(None), None);
}

#[test]
fn close_suppressed() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::<Obj>::new(&sched, Cfg { emit_close: false, ..Cfg::object() });
    let events = Events::watch_readable(&src);

    src.destroy(Some(StreamError::producer("boom")));
    sched.run_until_idle();
    assert_eq!(events.get(), vec!["error: producer error: boom"]);
}

#[test]
fn ended_without_auto_destroy() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg { auto_destroy: false, ..Cfg::object() });
    let events = Events::watch_readable(&src);
    let received = crate::consume(&src);

    src.push(Obj(1)).unwrap();
    src.push_eof().unwrap();
    sched.run_until_idle();

    assert_eq!(*received.borrow(), vec![Obj(1)]);
    assert_eq!(events.get(), vec!["end"]);
    assert!(!src.is_destroyed());
    assert_eq!(src.state(), ReadableState::Ended);

    src.destroy(None);
    sched.run_until_idle();
    assert_eq!(events.get(), vec!["end", "close"]);
}

#[test]
fn teardown_completes_later() {
    crate::init();

    struct Slow {
        done: std::rc::Rc<std::cell::RefCell<Option<Done>>>,
    }

    impl Source<Obj> for Slow {
        fn teardown(&mut self, _err: Option<&StreamError>, done: Done) {
            *self.done.borrow_mut() = Some(done);
        }
    }

    let sched = Scheduler::new();
    let slot = std::rc::Rc::new(std::cell::RefCell::new(None));
    let src = Readable::with_source(&sched, Cfg::object(), Slow { done: slot.clone() });
    let events = Events::watch_readable(&src);

    src.destroy(None);
    sched.run_until_idle();
    assert!(events.get().is_empty(), "closed before teardown completed");

    println!("Teardown fails");
    let done = slot.borrow_mut().take().unwrap();
    done.fail(StreamError::producer("release failed"));
    sched.run_until_idle();
    assert_eq!(events.get(), vec!["error: producer error: release failed", "close"]);
}
