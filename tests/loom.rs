#![allow(missing_docs)]
#![cfg(feature = "loom")]

use pcg::{
    fold::{connect_fold, FoldHandle, FoldMode},
    node::{connect, NodeHandle},
    types::NodeId,
};

fn producer(id: usize, value: i64) -> NodeHandle<i64> {
    NodeHandle::with_function(NodeId::new(id), move || value)
}

#[test]
fn loom_streaming_fold_sees_every_concurrent_delivery() {
    loom::model(|| {
        // Two producers deliver into a streaming fold from separate threads;
        // the accumulator must observe both combines and the ready count
        // must only reach the declared count after both applied.
        let a = producer(0, 3);
        let b = producer(1, 5);
        let fold: FoldHandle<i64, i64> = FoldHandle::new(
            NodeId::new(2),
            FoldMode::Streaming,
            |acc: i64, value: &i64| acc + value,
            100,
        );
        connect_fold(&a, &fold);
        connect_fold(&b, &fold);

        let t1 = loom::thread::spawn({
            let a = a.clone();
            move || a.run().unwrap()
        });
        let t2 = loom::thread::spawn({
            let b = b.clone();
            move || b.run().unwrap()
        });
        t1.join().unwrap();
        t2.join().unwrap();

        assert!(fold.is_ready());
        fold.run().unwrap();
        assert_eq!(fold.result(), Some(108));
    });
}

#[test]
fn loom_batched_fold_buffers_every_concurrent_delivery() {
    loom::model(|| {
        let a = producer(0, 1);
        let b = producer(1, 2);
        let fold: FoldHandle<i64, i64> = FoldHandle::new(
            NodeId::new(2),
            FoldMode::Batched,
            |acc: i64, value: &i64| acc + value,
            0,
        );
        connect_fold(&a, &fold);
        connect_fold(&b, &fold);

        let t1 = loom::thread::spawn({
            let a = a.clone();
            move || a.run().unwrap()
        });
        let t2 = loom::thread::spawn({
            let b = b.clone();
            move || b.run().unwrap()
        });
        t1.join().unwrap();
        t2.join().unwrap();

        assert!(fold.is_ready());
        fold.run().unwrap();
        assert_eq!(fold.result(), Some(3));
    });
}

#[test]
fn loom_readiness_implies_the_slot_value_is_visible() {
    loom::model(|| {
        // A producer publishes into a consumer slot from another thread. Any
        // thread that observes the consumer ready must also observe the
        // delivered value, i.e. running the consumer cannot fail or read an
        // empty slot.
        let source = producer(0, 7);
        let double: NodeHandle<i64, (i64,)> =
            NodeHandle::with_function(NodeId::new(1), |x: &i64| x * 2);
        connect::<0, _, _, _>(&source, &double).unwrap();

        let t = loom::thread::spawn({
            let source = source.clone();
            move || source.run().unwrap()
        });

        if double.is_ready() {
            double.run().unwrap();
            assert_eq!(double.result(), Some(14));
        }

        t.join().unwrap();
    });
}
