use assert_cmd::Command;
use predicates::prelude::*;
use pystacks::aggregator::Aggregator;
use pystacks::cache::InterpreterInfoCache;
use pystacks::procinfo::read_tss_key;
use pystacks::slots::SlotPool;
use pystacks_common::metrics::Metrics;
use pystacks_common::python::offsets::PYTHON_CATALOG;
use pystacks_common::{
    OffsetTables, SampleEvent, StackStatus, TargetArch, UnwindBudget, UnwindError, Unwinder,
};
use tests::{request_stack, FrameSpec, ImageBuilder, PythonImage, PY311, PY312, PY38};

const PID: u32 = 4242;

const REQUEST_TRACE: &str = "<OrderView.get> /srv/app/views.py:42
<Order.load> /srv/app/models.py:17
<handle> /srv/app/main.py:8
<<module>> /srv/app/main.py:1
";

fn scenario(name: &str) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("pystacks-tests").unwrap();
    cmd.arg(name);
    cmd.assert().success()
}

#[test]
fn test_py38() {
    scenario("py38")
        .stdout(predicate::str::contains("3 samples in 4242:"))
        .stdout(predicate::str::contains(REQUEST_TRACE))
        .stderr(predicate::str::contains("stacks_complete: 3"));
}

#[test]
fn test_py311_tls() {
    scenario("py311")
        .stdout(predicate::str::contains("2 samples in 4242:"))
        .stdout(predicate::str::contains(REQUEST_TRACE))
        .stderr(predicate::str::contains("err_tls_read").not());
}

#[test]
fn test_py312_skips_shim_frames() {
    scenario("py312")
        .stdout(predicate::str::contains(REQUEST_TRACE))
        .stderr(predicate::str::contains("stacks_complete: 1"));
}

#[test]
fn test_deep_stack_truncates() {
    scenario("deep")
        .stdout(predicate::str::contains("<fib> /srv/app/recurse.py:75\n"))
        .stdout(predicate::str::contains("recurse.py:76\n").not())
        .stderr(predicate::str::contains("stacks_truncated: 1"));
}

#[test]
fn test_unknown_scenario_fails() {
    let mut cmd = Command::cargo_bin("pystacks-tests").unwrap();
    cmd.arg("py99").assert().failure();
}

/// The pieces a live session wires together, driven by synthetic images.
struct Pipeline {
    tables: OffsetTables,
    cache: InterpreterInfoCache,
    slots: SlotPool,
    aggregator: Aggregator,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            tables: OffsetTables::builtin(),
            cache: InterpreterInfoCache::new(8),
            slots: SlotPool::new(4),
            aggregator: Aggregator::new(),
        }
    }

    fn sample(&self, image: &PythonImage, tid: u32, budget: UnwindBudget) -> StackStatus {
        let unwinder = Unwinder::new(&self.tables)
            .with_arch(TargetArch::X86_64)
            .with_budget(budget);
        let event = SampleEvent::new(image.info.pid, tid, image.tls_base);
        let mut slot = self.slots.acquire(tid as usize);
        unwinder.run(&image.mem, &self.cache, &self.aggregator, &mut slot, &event)
    }
}

#[test]
fn same_stack_across_versions_has_one_id() {
    let pipeline = Pipeline::new();
    let images = [
        ImageBuilder::new(PID, PY38).frames(&request_stack()).build(),
        ImageBuilder::new(PID + 1, PY311).frames(&request_stack()).tls(3).build(),
        ImageBuilder::new(PID + 2, PY312).frames(&request_stack()).build(),
    ];
    for image in &images {
        pipeline.cache.insert(image.info);
        assert_eq!(
            pipeline.sample(image, image.info.pid, UnwindBudget::default()),
            StackStatus::Complete
        );
    }

    // symbols and stacks are content addressed, not per process
    assert_eq!(pipeline.aggregator.stack_count(), 1);
    assert_eq!(pipeline.aggregator.symbol_count(), 4);

    let top = pipeline.aggregator.top_stacks(10);
    assert_eq!(top.len(), 3);
    let trace = pipeline.aggregator.symbolize(top[0].1).unwrap();
    assert_eq!(trace.to_string(), REQUEST_TRACE);
}

#[test]
fn unknown_pid_is_counted() {
    let pipeline = Pipeline::new();
    let image = ImageBuilder::new(PID, PY38).frames(&request_stack()).build();

    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Error
    );
    assert_eq!(pipeline.aggregator.metric(Metrics::ErrPy_InterpreterInfoMissing), 1);
    assert!(pipeline.aggregator.top_stacks(1).is_empty());

    // once discovery publishes the process it unwinds
    pipeline.cache.insert(image.info);
    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Complete
    );
    pipeline.cache.remove(PID);
    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Error
    );
    assert_eq!(pipeline.aggregator.metric(Metrics::ErrPy_InterpreterInfoMissing), 2);
    assert_eq!(pipeline.aggregator.metric(Metrics::SamplesSubmitted), 3);
}

#[test]
fn idle_thread_reports_null_frame() {
    let pipeline = Pipeline::new();
    let image = ImageBuilder::new(PID, PY311).build();
    pipeline.cache.insert(image.info);

    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Error
    );
    assert_eq!(pipeline.aggregator.metric(Metrics::ErrPy_FrameNull), 1);
    assert_eq!(
        Metrics::from(UnwindError::FrameNull).name(),
        "err_frame_null"
    );
}

#[test]
fn wrong_tls_key_fails_cleanly() {
    let pipeline = Pipeline::new();
    let mut image = ImageBuilder::new(PID, PY312).frames(&request_stack()).tls(2).build();
    image.info.tls_key = 5;
    pipeline.cache.insert(image.info);

    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Error
    );
    assert_eq!(pipeline.aggregator.metric(Metrics::ErrPy_TlsRead), 1);
}

#[test]
fn tls_key_comes_from_the_runtime() {
    let pipeline = Pipeline::new();
    // keys 0..=2 belong to libraries loaded before the interpreter
    let mut image = ImageBuilder::new(PID, PY311).frames(&request_stack()).tls(3).build();
    image.info.tls_key = 0;

    let offset = PYTHON_CATALOG[image.info.py_version_index as usize]
        .1
        .py_runtime_state
        .autotss_key;
    let key = read_tss_key(&image.mem, image.runtime, offset).unwrap();
    assert_eq!(key, 3);

    image.info.tls_key = key;
    pipeline.cache.insert(image.info);
    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Complete
    );
    let top = pipeline.aggregator.top_stacks(1);
    assert_eq!(
        pipeline.aggregator.symbolize(top[0].1).unwrap().to_string(),
        REQUEST_TRACE
    );
}

#[test]
fn budget_bounds_depth() {
    let pipeline = Pipeline::new();
    let image = ImageBuilder::new(PID, PY311)
        .repeat(FrameSpec::method("/srv/app/tree.py", "Node", "visit", 0), 40)
        .build();
    pipeline.cache.insert(image.info);

    let small = UnwindBudget::new(10, 2).unwrap();
    assert_eq!(pipeline.sample(&image, PID, small), StackStatus::Truncated);
    assert_eq!(
        pipeline.sample(&image, PID, UnwindBudget::default()),
        StackStatus::Complete
    );

    let top = pipeline.aggregator.top_stacks(2);
    let depths: Vec<usize> = top
        .iter()
        .map(|(_, id, _)| pipeline.aggregator.symbolize(*id).unwrap().frames.len())
        .collect();
    assert!(depths.contains(&20));
    assert!(depths.contains(&40));
    assert_eq!(pipeline.aggregator.metric(Metrics::StacksTruncated), 1);
    assert_eq!(pipeline.aggregator.metric(Metrics::StacksComplete), 1);
}

#[test]
fn concurrent_workers_share_the_sink() {
    let pipeline = Pipeline::new();
    let image = ImageBuilder::new(PID, PY38).frames(&request_stack()).build();
    pipeline.cache.insert(image.info);

    std::thread::scope(|scope| {
        for worker in 0..4u32 {
            let pipeline = &pipeline;
            let image = &image;
            scope.spawn(move || {
                for _ in 0..25 {
                    pipeline.sample(image, PID + worker, UnwindBudget::default());
                }
            });
        }
    });

    assert_eq!(pipeline.aggregator.metric(Metrics::SamplesSubmitted), 100);
    assert_eq!(pipeline.aggregator.top_stacks(1)[0].2, 100);
    assert_eq!(pipeline.aggregator.stack_count(), 1);
}
