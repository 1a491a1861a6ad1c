use weir::{Cfg, Readable, Scheduler, StreamError, Writable};

use crate::{consume, Collect, Obj};

#[tokio::test]
async fn writable_finished() {
    crate::init();

    let sched = Scheduler::new();
    let dst = Writable::new(&sched, Cfg::object(), Collect::new());
    dst.write(Obj(1)).unwrap();
    dst.end().unwrap();

    assert_eq!(sched.run_until(dst.finished()).await, Ok(()));
    println!("Already finished");
    assert_eq!(dst.finished().await, Ok(()));
}

#[tokio::test]
async fn readable_finished() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg::object());
    let _received = consume(&src);
    src.push(Obj(1)).unwrap();
    src.push_eof().unwrap();

    assert_eq!(sched.run_until(src.finished()).await, Ok(()));
}

#[tokio::test]
async fn failed() {
    crate::init();

    let sched = Scheduler::new();
    let dst = Writable::<Obj>::new(&sched, Cfg::object(), Collect::new());
    let finished = dst.finished();
    dst.destroy(Some(StreamError::consumer("broken pipe")));

    assert_eq!(sched.run_until(finished).await, Err(StreamError::Consumer("broken pipe".into())));
}

#[tokio::test]
async fn destroyed_before_end() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::<Obj>::new(&sched, Cfg::object());
    let finished = src.finished();
    src.destroy(None);

    assert_eq!(sched.run_until(finished).await, Err(StreamError::PrematureClose));
    assert_eq!(src.finished().await, Err(StreamError::PrematureClose));
}

#[tokio::test]
async fn listeners_removed_when_settled() {
    crate::init();

    let sched = Scheduler::new();
    let dst = Writable::new(&sched, Cfg { auto_destroy: false, ..Cfg::object() }, Collect::new());
    let idle = dst.listener_count();

    let finished = dst.finished();
    assert_eq!(dst.listener_count(), idle + 3);

    dst.write(Obj(1)).unwrap();
    dst.end().unwrap();
    assert_eq!(sched.run_until(finished).await, Ok(()));

    println!("Channel stays open, error and close listeners are gone");
    assert!(!dst.is_destroyed());
    assert_eq!(dst.listener_count(), idle);

    let src = Readable::<Obj>::new(&sched, Cfg::object());
    let finished = src.finished();
    src.destroy(Some(StreamError::producer("gone")));
    assert_eq!(sched.run_until(finished).await, Err(StreamError::Producer("gone".into())));
    assert_eq!(src.listener_count(), 0);
}
