#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use pcg::{
    fold::{connect_fold, FoldHandle, FoldMode},
    graph::Graph,
    node::Producer,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A randomly generated DAG together with everything needed to check a run:
/// the sequentially computed expected value, a result getter and an
/// execution counter per node.
struct RandomDag {
    graph: Graph,
    expected: Vec<i64>,
    results: Vec<Box<dyn Fn() -> Option<i64>>>,
    runs: Vec<Arc<AtomicUsize>>,
}

/// Every node computes `sum(parents) + own constant`, so each expected value
/// is derivable sequentially and any readiness violation or lost delivery
/// shows up as a wrong result downstream.
fn random_dag(seed: u64, workers: usize) -> RandomDag {
    let mut rng = StdRng::seed_from_u64(seed);
    let node_count = rng.gen_range(5..40);

    let mut graph = Graph::new(workers);
    let mut producers: Vec<Box<dyn Producer<Output = i64>>> = Vec::new();
    let mut expected = Vec::new();
    let mut results: Vec<Box<dyn Fn() -> Option<i64>>> = Vec::new();
    let mut runs = Vec::new();

    for index in 0..node_count {
        let constant = rng.gen_range(-1000i64..1000);
        let counter = Arc::new(AtomicUsize::new(0));
        let observe = {
            let counter = Arc::clone(&counter);
            move |_: &i64| {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        };

        if index == 0 || rng.gen_bool(0.25) {
            let input = graph.add_input::<i64>();
            graph.set_input(input.id(), constant).unwrap();
            input.on_computed(observe);
            expected.push(constant);
            results.push(Box::new({
                let input = input.clone();
                move || input.result()
            }));
            producers.push(Box::new(input));
        } else if rng.gen_bool(0.5) {
            let parent = rng.gen_range(0..index);
            let node = graph.add_node(
                move |x: &i64| x.wrapping_add(constant),
                (&*producers[parent],),
            );
            node.on_computed(observe);
            expected.push(expected[parent].wrapping_add(constant));
            results.push(Box::new({
                let node = node.clone();
                move || node.result()
            }));
            producers.push(Box::new(node));
        } else {
            let left = rng.gen_range(0..index);
            let right = rng.gen_range(0..index);
            let node = graph.add_node(
                move |x: &i64, y: &i64| x.wrapping_add(*y).wrapping_add(constant),
                (&*producers[left], &*producers[right]),
            );
            node.on_computed(observe);
            expected.push(expected[left].wrapping_add(expected[right]).wrapping_add(constant));
            results.push(Box::new({
                let node = node.clone();
                move || node.result()
            }));
            producers.push(Box::new(node));
        }
        runs.push(counter);
    }

    RandomDag {
        graph,
        expected,
        results,
        runs,
    }
}

#[test]
fn every_node_runs_exactly_once_with_the_expected_value() {
    for seed in 0..16 {
        let dag = random_dag(seed, 4);
        dag.graph.run().unwrap();

        for (index, result) in dag.results.iter().enumerate() {
            assert_eq!(
                result(),
                Some(dag.expected[index]),
                "seed {seed}: node {index} produced a wrong value"
            );
            assert_eq!(
                dag.runs[index].load(Ordering::Relaxed),
                1,
                "seed {seed}: node {index} did not run exactly once"
            );
        }
    }
}

#[test]
fn identical_graphs_produce_identical_results() {
    for seed in [3, 11, 42] {
        let first = random_dag(seed, 2);
        let second = random_dag(seed, 8);
        first.graph.run().unwrap();
        second.graph.run().unwrap();

        for (a, b) in first.results.iter().zip(&second.results) {
            assert_eq!(a(), b(), "seed {seed}: runs diverged");
        }
    }
}

#[test]
fn single_worker_still_completes() {
    let dag = random_dag(7, 1);
    dag.graph.run().unwrap();
    for (index, result) in dag.results.iter().enumerate() {
        assert_eq!(result(), Some(dag.expected[index]));
    }
}

#[test]
fn fold_over_many_producers_matches_a_sequential_sum() {
    for seed in 0..8 {
        let mut rng = StdRng::seed_from_u64(seed);
        let fan_in = rng.gen_range(1..12usize);

        let mut graph = Graph::new(4);
        let input = graph.add_input::<i64>();
        graph.set_input(input.id(), 1i64).unwrap();

        // Sum is commutative and associative, so both modes must agree with
        // the sequential total no matter which producer finishes first.
        let streaming: FoldHandle<i64, i64> = graph.add_fold(
            FoldMode::Streaming,
            |acc: i64, value: &i64| acc + value,
            0,
            (),
        );
        let batched: FoldHandle<i64, i64> = graph.add_fold(
            FoldMode::Batched,
            |acc: i64, value: &i64| acc + value,
            0,
            (),
        );

        let mut total = 0i64;
        for _ in 0..fan_in {
            let weight = rng.gen_range(1i64..100);
            let node = graph.add_node(move |x: &i64| x * weight, (&input,));
            connect_fold(&node, &streaming);
            connect_fold(&node, &batched);
            total += weight;
        }

        graph.run().unwrap();

        assert_eq!(streaming.result(), Some(total), "seed {seed}");
        assert_eq!(batched.result(), Some(total), "seed {seed}");
    }
}
