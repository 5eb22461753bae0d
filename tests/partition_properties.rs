use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use render_orchestrator::renderer::{last_worker_with_work, partition, will_do_work};

const CASES: usize = 500;

#[test]
fn ranges_tile_the_problem_in_worker_order() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);

    for _ in 0..CASES {
        let size = rng.gen_range(0..2_000);
        let workers = rng.gen_range(1..33);

        let mut next = 0;
        for worker in 0..workers {
            let range = partition(size, worker, workers);
            assert_eq!(range.start, next, "size {size}, workers {workers}, worker {worker}");
            assert!(range.end >= range.start);
            next = range.end;
        }
        assert_eq!(next, size);
    }
}

#[test]
fn range_sizes_differ_by_at_most_one() {
    let mut rng = SmallRng::seed_from_u64(7);

    for _ in 0..CASES {
        let size = rng.gen_range(0..5_000);
        let workers = rng.gen_range(1..65);

        let lens: Vec<_> = (0..workers).map(|w| partition(size, w, workers).len()).collect();
        let min = lens.iter().min().copied().unwrap_or(0);
        let max = lens.iter().max().copied().unwrap_or(0);
        assert!(max - min <= 1, "size {size}, workers {workers}: {lens:?}");
        // Larger shares go to the lowest ids.
        assert!(lens.windows(2).all(|pair| pair[0] >= pair[1]));
    }
}

#[test]
fn last_worker_is_the_highest_with_a_non_empty_range() {
    let mut rng = SmallRng::seed_from_u64(42);

    for _ in 0..CASES {
        let size = rng.gen_range(0..100);
        let workers = rng.gen_range(1..17);

        let expected = (0..workers).filter(|&w| will_do_work(size, w, workers)).max();
        assert_eq!(last_worker_with_work(size, workers), expected);
        if size > 0 {
            assert_eq!(expected, Some(size.min(workers) - 1));
        }
    }
}

#[test]
fn empty_problem_has_no_last_worker() {
    for workers in 1..10 {
        assert_eq!(last_worker_with_work(0, workers), None);
        assert!((0..workers).all(|w| partition(0, w, workers).is_empty()));
    }
}
