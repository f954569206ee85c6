use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use dashmap::DashSet;
use opentelemetry::KeyValue;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::classfile::{ClassfileParser, ParseOutcome};
use crate::classpath::ClasspathElement;
use crate::config::ScanConfig;
use crate::ir::ClassfileRecord;
use crate::telemetry::{with_span, Telemetry};

/// One classfile to parse: which classpath element holds it, the resource
/// path inside that element, and whether it was reached by extending
/// scanning upwards.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WorkUnit {
    pub(crate) element: usize,
    pub(crate) relative_path: String,
    pub(crate) is_external: bool,
}

struct QueueState {
    queue: VecDeque<WorkUnit>,
    in_flight: usize,
    cancelled: bool,
}

/// Unbounded many-producer many-consumer queue of classfile work units.
///
/// Workers block in `next` until a unit is available or the queue is
/// quiescent (empty with nothing in flight); any worker may enqueue more
/// units while parsing. Cancelling drains the queue and wakes everyone.
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl WorkQueue {
    pub(crate) fn new(initial: Vec<WorkUnit>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: initial.into(),
                in_flight: 0,
                cancelled: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn add_work_units(&self, units: Vec<WorkUnit>) {
        if units.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        state.queue.extend(units);
        self.available.notify_all();
    }

    /// Take the next unit, blocking while other workers may still produce
    /// more. Returns `None` once the queue is quiescent or cancelled; the
    /// taken unit must be paired with a later `unit_done` call.
    pub(crate) fn next(&self) -> Option<WorkUnit> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                state.queue.clear();
                return None;
            }
            if let Some(unit) = state.queue.pop_front() {
                state.in_flight += 1;
                return Some(unit);
            }
            if state.in_flight == 0 {
                self.available.notify_all();
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    pub(crate) fn unit_done(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 && state.queue.is_empty() {
            self.available.notify_all();
        }
    }

    /// Discard outstanding units and wake all workers. Units already being
    /// parsed run to completion; their output is dropped by the caller.
    #[allow(dead_code)]
    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.queue.clear();
        self.available.notify_all();
    }
}

/// A parsed record together with the classpath element it came from.
pub(crate) struct ParsedClassfile {
    pub(crate) element: usize,
    pub(crate) record: ClassfileRecord,
}

pub(crate) struct ScanOutcome {
    pub(crate) records: Vec<ParsedClassfile>,
    /// Classfiles enumerated from the scan-target elements.
    pub(crate) enumerated: usize,
    pub(crate) skipped: usize,
    pub(crate) errors: usize,
}

/// Scan the classpath: enumerate classfiles from the first `scan_targets`
/// elements, parse them on `threads` workers, and (when configured) extend
/// scanning upwards into the remaining elements. Parse failures and skips
/// never abort the scan.
pub(crate) fn scan(
    elements: &[ClasspathElement],
    scan_targets: usize,
    config: &ScanConfig,
    threads: usize,
    telemetry: Option<&Telemetry>,
) -> Result<ScanOutcome> {
    let scheduled: DashSet<String> = DashSet::new();

    let initial = with_span(telemetry, "enumerate", &[], || -> Result<Vec<WorkUnit>> {
        let mut initial = Vec::new();
        for (index, element) in elements.iter().take(scan_targets).enumerate() {
            for relative_path in element
                .class_resources()
                .with_context(|| format!("failed to enumerate {}", element.describe()))?
            {
                let class_name = class_name_for_path(&relative_path);
                // Every element may carry its own module descriptor, so
                // module-info is exempt from classpath masking.
                if class_name == "module-info" || scheduled.insert(class_name) {
                    initial.push(WorkUnit {
                        element: index,
                        relative_path,
                        is_external: false,
                    });
                }
            }
        }
        Ok(initial)
    })?;
    let enumerated = initial.len();

    let queue = WorkQueue::new(initial);
    let records = Mutex::new(Vec::new());
    let skipped = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);

    let threads = threads.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("failed to build scan thread pool")?;
    with_span(
        telemetry,
        "parse",
        &[KeyValue::new("classweave.classfiles", enumerated as i64)],
        || {
            pool.scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(|_| {
                        let mut parser = ClassfileParser::new();
                        let mut scratch = Vec::new();
                        while let Some(unit) = queue.next() {
                            process_unit(
                                &unit,
                                elements,
                                config,
                                &mut parser,
                                &mut scratch,
                                &scheduled,
                                &queue,
                                &records,
                                &skipped,
                                &errors,
                            );
                            queue.unit_done();
                        }
                    });
                }
            });
        },
    );

    Ok(ScanOutcome {
        records: records.into_inner(),
        enumerated,
        skipped: skipped.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
    })
}

#[allow(clippy::too_many_arguments)]
fn process_unit(
    unit: &WorkUnit,
    elements: &[ClasspathElement],
    config: &ScanConfig,
    parser: &mut ClassfileParser,
    scratch: &mut Vec<u8>,
    scheduled: &DashSet<String>,
    queue: &WorkQueue,
    records: &Mutex<Vec<ParsedClassfile>>,
    skipped: &AtomicUsize,
    errors: &AtomicUsize,
) {
    let element = &elements[unit.element];
    let bytes = match element.read_class(&unit.relative_path, scratch) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                path = %unit.relative_path,
                element = %element.describe(),
                "failed to read classfile: {err:#}"
            );
            errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    match parser.parse(
        bytes.bytes(),
        &unit.relative_path,
        element,
        config,
        unit.is_external,
    ) {
        Ok(ParseOutcome::Parsed(record)) => {
            if config.extend_scanning_upwards_to_external_classes {
                let additional =
                    discover_external_classes(&record, unit.element, elements, scheduled);
                queue.add_work_units(additional);
            }
            records.lock().push(ParsedClassfile {
                element: unit.element,
                record: *record,
            });
        }
        Ok(ParseOutcome::Skipped(reason)) => {
            debug!(path = %unit.relative_path, %reason, "skipped classfile");
            skipped.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            warn!("{err}");
            errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Walk the parsed record's superclass, interfaces, and annotations; for
/// each class name not yet scheduled, locate its classfile (current element
/// first, then classpath order) and build an external work unit for it.
fn discover_external_classes(
    record: &ClassfileRecord,
    current: usize,
    elements: &[ClasspathElement],
    scheduled: &DashSet<String>,
) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    {
        let mut schedule = |class_name: &str, relationship: &'static str| {
            schedule_if_external(
                class_name,
                relationship,
                current,
                elements,
                scheduled,
                &mut units,
            );
        };
        if let Some(superclass) = &record.superclass_name {
            schedule(superclass, "superclass");
        }
        for interface in &record.implemented_interfaces {
            schedule(interface, "interface");
        }
        for annotation in &record.class_annotations {
            schedule(&annotation.class_name, "class annotation");
        }
        for method in &record.methods {
            for annotation in &method.annotations {
                schedule(&annotation.class_name, "method annotation");
            }
            if let Some(parameter_annotations) = &method.parameter_annotations {
                for annotations in parameter_annotations {
                    for annotation in annotations {
                        schedule(&annotation.class_name, "method parameter annotation");
                    }
                }
            }
        }
        for field in &record.fields {
            for annotation in &field.annotations {
                schedule(&annotation.class_name, "field annotation");
            }
        }
    }
    units
}

fn schedule_if_external(
    class_name: &str,
    relationship: &'static str,
    current: usize,
    elements: &[ClasspathElement],
    scheduled: &DashSet<String>,
    units: &mut Vec<WorkUnit>,
) {
    // The insert succeeds exactly once per class name across all workers.
    if !scheduled.insert(class_name.to_string()) {
        return;
    }
    let classfile_path = format!("{}.class", class_name.replace('.', "/"));
    // Check the current element first to avoid iterating the classpath.
    let found = if elements[current].has_resource(&classfile_path) {
        Some(current)
    } else {
        elements
            .iter()
            .enumerate()
            .find(|(index, element)| *index != current && element.has_resource(&classfile_path))
            .map(|(index, _)| index)
    };
    match found {
        Some(index) => {
            debug!(
                class = %class_name,
                relationship,
                element = %elements[index].describe(),
                "scheduling external class for scanning"
            );
            units.push(WorkUnit {
                element: index,
                relative_path: classfile_path,
                is_external: true,
            });
        }
        None => {
            if class_name != "java.lang.Object" {
                debug!(
                    class = %class_name,
                    relationship,
                    "external class not found in any classpath element"
                );
            }
        }
    }
}

/// Derive the dot-separated class name from a classfile resource path.
pub(crate) fn class_name_for_path(relative_path: &str) -> String {
    relative_path
        .strip_suffix(".class")
        .unwrap_or(relative_path)
        .replace('/', ".")
}
