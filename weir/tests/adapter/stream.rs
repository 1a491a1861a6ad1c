use bytes::Bytes;
use futures::StreamExt;
use weir::{Cfg, Readable, Scheduler, StreamError};

use crate::{objs, Obj};

#[tokio::test]
async fn collect_until_end() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg::object());
    let mut stream = src.stream();

    for i in 1..=3 {
        src.push(Obj(i)).unwrap();
    }
    src.push_eof().unwrap();

    let items = sched
        .run_until(async {
            let mut items = Vec::new();
            while let Some(item) = stream.next().await {
                items.push(item.unwrap());
            }
            items
        })
        .await;

    assert_eq!(items, objs(1..=3));
    assert!(src.is_ended());
}

#[tokio::test]
async fn pushed_while_waiting() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::new(&sched, Cfg::default());
    let mut stream = src.stream();

    let producer = src.clone();
    let s = sched.clone();
    sched.post(move || {
        producer.push(Bytes::from_static(b"late")).unwrap();
        let producer = producer.clone();
        s.post(move || producer.push_eof().unwrap());
    });

    let mut received = Vec::new();
    sched
        .run_until(async {
            while let Some(item) = stream.next().await {
                received.push(item.unwrap());
            }
        })
        .await;

    assert_eq!(received.concat(), b"late".to_vec());
}

#[tokio::test]
async fn error_ends_stream() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::<Obj>::new(&sched, Cfg::object());
    let mut stream = src.stream();
    src.push(Obj(1)).unwrap();
    src.destroy(Some(StreamError::producer("boom")));

    let items: Vec<_> = sched.run_until(async { (&mut stream).collect::<Vec<_>>().await }).await;
    assert_eq!(items, vec![Err(StreamError::Producer("boom".into()))]);
}

#[tokio::test]
async fn premature_close() {
    crate::init();

    let sched = Scheduler::new();
    let src = Readable::<Obj>::new(&sched, Cfg::object());
    let mut stream = src.stream();

    let s = src.clone();
    sched.post(move || s.destroy(None));

    let item = sched.run_until(stream.next()).await;
    assert_eq!(item, Some(Err(StreamError::PrematureClose)));
    assert_eq!(sched.run_until(stream.next()).await, None);
}
