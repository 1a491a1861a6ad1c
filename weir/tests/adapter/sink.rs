use futures::SinkExt;
use weir::{Cfg, Scheduler, StreamError, Writable};

use crate::{objs, Collect, Held, Obj};

#[tokio::test]
async fn send_and_close() {
    crate::init();

    let sched = Scheduler::new();
    let collect = Collect::new();
    let dst = Writable::new(&sched, Cfg::object(), collect.clone());
    let mut sink = dst.sink();

    sched
        .run_until(async {
            for i in 1..=3 {
                sink.send(Obj(i)).await?;
            }
            sink.close().await
        })
        .await
        .unwrap();

    assert_eq!(collect.chunks(), objs(1..=3));
    assert!(dst.is_finished());
}

#[tokio::test]
async fn ready_waits_for_drain() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object().with_high_water_mark(1), held.clone());
    let mut sink = dst.sink();

    sched
        .run_until(async {
            sink.feed(Obj(1)).await?;
            assert!(sink.writable().need_drain());

            let h = held.clone();
            sched.post(move || {
                while h.complete_one() {}
            });
            sink.feed(Obj(2)).await
        })
        .await
        .unwrap();

    assert_eq!(held.chunks(), objs(1..=2));
    assert_eq!(held.pending(), 1);
}

#[tokio::test]
async fn write_error_reported() {
    crate::init();

    let sched = Scheduler::new();
    let held = Held::new();
    let dst = Writable::new(&sched, Cfg::object(), held.clone());
    let mut sink = dst.sink();

    let res = sched
        .run_until(async {
            sink.feed(Obj(1)).await?;

            let h = held.clone();
            sched.post(move || {
                h.fail_one(StreamError::consumer("gone"));
            });
            sink.flush().await
        })
        .await;

    assert_eq!(res, Err(StreamError::Consumer("gone".into())));
    assert!(dst.is_destroyed());
}
