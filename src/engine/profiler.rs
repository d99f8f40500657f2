// Hierarchical frame profiler.
//
// Spans are pushed and popped around each render stage. Every frame records
// a flat entry list whose parent links form the pass tree; each named pass
// keeps moving CPU and GPU time statistics across frames.
//
// GPU time comes from timestamp pairs in a small ring of queries per pass
// (QUERY_BUFFER_SIZE slots). Results are read on the following frame and the
// CPU only waits when a ring is about to be overwritten before being read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::containers::{GrowableArray, Stack};

pub const QUERY_BUFFER_SIZE: usize = 4;
pub const MOVING_AVERAGE_SAMPLES: usize = 200;

/// Caller-chosen identifier of a profiled pass.
pub type PassId = u32;

// ============================================================================
// TIME STATISTICS
// ============================================================================

/// Moving window over the last `MOVING_AVERAGE_SAMPLES` durations (ms), plus
/// all-time min and max.
#[derive(Debug, Clone)]
pub struct TimeInfo {
    values: Box<[f64; MOVING_AVERAGE_SAMPLES]>,
    next:   usize,
    filled: usize,
    sum:    f64,
    min:    f64,
    max:    f64,
}

impl Default for TimeInfo {
    fn default() -> Self {
        Self {
            values: Box::new([0.0; MOVING_AVERAGE_SAMPLES]),
            next: 0,
            filled: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }
}

impl TimeInfo {
    pub fn add(&mut self, ms: f64) {
        self.min = self.min.min(ms);
        self.max = self.max.max(ms);

        // Replace the oldest sample once the window is full.
        self.sum += ms - self.values[self.next];
        self.values[self.next] = ms;
        self.next = (self.next + 1) % MOVING_AVERAGE_SAMPLES;
        self.filled = (self.filled + 1).min(MOVING_AVERAGE_SAMPLES);
    }

    /// Mean of the samples in the window; 0 before the first sample.
    pub fn average(&self) -> f64 {
        if self.filled == 0 { 0.0 } else { self.sum / self.filled as f64 }
    }

    pub fn min(&self) -> Option<f64> {
        (self.filled > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.filled > 0).then_some(self.max)
    }

    pub fn samples(&self) -> usize {
        self.filled
    }
}

// ============================================================================
// GPU TIMESTAMP QUERIES
// ============================================================================

/// Creates per-pass query rings. Needs `TIMESTAMP_QUERY` and
/// `TIMESTAMP_QUERY_INSIDE_ENCODERS`.
pub struct GpuTimer {
    device: Arc<wgpu::Device>,
    queue:  Arc<wgpu::Queue>,
    /// Nanoseconds per tick.
    period: f32,
}

impl GpuTimer {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let period = queue.get_timestamp_period();
        Self { device, queue, period }
    }

    fn create_query(&self, name: &str) -> BufferedQuery {
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some(name),
            ty: wgpu::QueryType::Timestamp,
            count: (QUERY_BUFFER_SIZE * 2) as u32,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Resolve Buffer"),
            size: QUERY_BUFFER_SIZE as u64 * wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = (0..QUERY_BUFFER_SIZE)
            .map(|_| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Timestamp Readback Buffer"),
                    size: 2 * wgpu::QUERY_SIZE as u64,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        BufferedQuery {
            query_set,
            resolve,
            readback,
            mapped: (0..QUERY_BUFFER_SIZE).map(|_| Arc::new(AtomicBool::new(false))).collect(),
            ring: QueryRing::default(),
        }
    }

    fn submit_timestamp(&self, query: &BufferedQuery, index: u32) {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Timestamp Encoder"),
        });
        encoder.write_timestamp(&query.query_set, index);
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn begin(&self, query: &BufferedQuery) {
        self.submit_timestamp(query, (query.ring.write_slot() * 2) as u32);
    }

    fn end(&self, query: &mut BufferedQuery) {
        let slot = query.ring.write_slot();
        let offset = slot as u64 * wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Timestamp Resolve Encoder"),
        });
        encoder.write_timestamp(&query.query_set, (slot * 2 + 1) as u32);
        let first = (slot * 2) as u32;
        encoder.resolve_query_set(&query.query_set, first..first + 2, &query.resolve, offset);
        encoder.copy_buffer_to_buffer(&query.resolve, offset, &query.readback[slot], 0, 2 * wgpu::QUERY_SIZE as u64);
        self.queue.submit(std::iter::once(encoder.finish()));

        let flag = query.mapped[slot].clone();
        query.readback[slot].slice(..).map_async(wgpu::MapMode::Read, move |result| {
            if result.is_ok() {
                flag.store(true, Ordering::Release);
            }
        });

        query.ring.commit_write();
    }

    /// Oldest unread result in milliseconds. With `wait`, blocks until the
    /// GPU has produced it.
    fn read(&self, query: &mut BufferedQuery, wait: bool) -> Option<f64> {
        let slot = query.ring.read_slot()?;
        if !query.mapped[slot].load(Ordering::Acquire) {
            if !wait {
                return None;
            }
            self.device.poll(wgpu::Maintain::Wait);
            if !query.mapped[slot].load(Ordering::Acquire) {
                return None;
            }
        }

        let ticks: Vec<u64> = {
            let view = query.readback[slot].slice(..).get_mapped_range();
            bytemuck::pod_collect_to_vec(&view[..])
        };
        query.readback[slot].unmap();
        query.mapped[slot].store(false, Ordering::Release);
        query.ring.commit_read();

        let elapsed = ticks[1].saturating_sub(ticks[0]);
        Some(elapsed as f64 * self.period as f64 / 1_000_000.0)
    }
}

/// Slot bookkeeping for a query ring. Slots are written in order and read
/// back oldest first.
#[derive(Debug, Clone, Default)]
struct QueryRing {
    pending: [bool; QUERY_BUFFER_SIZE],
    write:   usize,
    read:    usize,
}

impl QueryRing {
    fn write_slot(&self) -> usize {
        self.write
    }

    /// Oldest slot holding an unread result.
    fn read_slot(&self) -> Option<usize> {
        self.pending[self.read].then_some(self.read)
    }

    fn commit_write(&mut self) -> usize {
        let slot = self.write;
        self.pending[slot] = true;
        self.write = (slot + 1) % QUERY_BUFFER_SIZE;
        slot
    }

    fn commit_read(&mut self) {
        self.pending[self.read] = false;
        self.read = (self.read + 1) % QUERY_BUFFER_SIZE;
    }

    /// The next write would land on the slot that is read next.
    fn about_to_wrap(&self) -> bool {
        self.pending[self.read] && (self.write + 1) % QUERY_BUFFER_SIZE == self.read
    }

    /// The write slot still holds an unread result.
    fn is_full(&self) -> bool {
        self.pending[self.write]
    }
}

/// Ring of `QUERY_BUFFER_SIZE` begin/end timestamp pairs for one pass.
struct BufferedQuery {
    query_set: wgpu::QuerySet,
    resolve:   wgpu::Buffer,
    readback:  Vec<wgpu::Buffer>,
    mapped:    Vec<Arc<AtomicBool>>,
    ring:      QueryRing,
}

impl BufferedQuery {
    fn is_ready(&self) -> bool {
        self.ring
            .read_slot()
            .is_some_and(|slot| self.mapped[slot].load(Ordering::Acquire))
    }

    fn about_to_wrap(&self) -> bool {
        self.ring.about_to_wrap()
    }

    fn is_full(&self) -> bool {
        self.ring.is_full()
    }
}

// ============================================================================
// PROFILER
// ============================================================================

struct ProfileEntry {
    pass:   usize,
    start:  Instant,
    parent: Option<usize>,
}

/// One span of a frame, in push order.
#[derive(Debug, Clone, Copy)]
struct FrameSpan {
    pass:  usize,
    depth: usize,
}

struct RenderPassInfo {
    name:  &'static str,
    query: Option<BufferedQuery>,
    cpu:   TimeInfo,
    gpu:   TimeInfo,
}

/// One row of the pass tree shown in the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct PassRow {
    pub name:   &'static str,
    pub depth:  usize,
    pub cpu_ms: f64,
    pub gpu_ms: Option<f64>,
}

pub struct Profiler {
    frame_start: Instant,
    entries:     GrowableArray<ProfileEntry>,
    parents:     Stack<(usize, PassId)>,
    current:     GrowableArray<FrameSpan>,
    previous:    GrowableArray<FrameSpan>,
    passes:      Vec<RenderPassInfo>,
    by_id:       HashMap<PassId, usize>,
    gpu:         Option<GpuTimer>,
}

impl Profiler {
    pub fn new(gpu: Option<GpuTimer>) -> Self {
        Self {
            frame_start: Instant::now(),
            entries: GrowableArray::with_capacity(100),
            parents: Stack::with_capacity(100),
            current: GrowableArray::with_capacity(100),
            previous: GrowableArray::with_capacity(100),
            passes: Vec::new(),
            by_id: HashMap::new(),
            gpu,
        }
    }

    pub fn has_gpu_timer(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn push_span(&mut self, name: &'static str, id: PassId) {
        let pass = match self.by_id.get(&id) {
            Some(&pass) => pass,
            None => {
                let query = self.gpu.as_ref().map(|gpu| gpu.create_query(name));
                self.passes.push(RenderPassInfo {
                    name,
                    query,
                    cpu: TimeInfo::default(),
                    gpu: TimeInfo::default(),
                });
                self.by_id.insert(id, self.passes.len() - 1);
                self.passes.len() - 1
            }
        };

        let parent = self.parents.try_peek().map(|&(entry, _)| entry);
        self.entries.add(ProfileEntry { pass, start: Instant::now(), parent });
        self.current.add(FrameSpan { pass, depth: self.parents.len() });
        self.parents.push((self.entries.len() - 1, id));

        if let Some(gpu) = self.gpu.as_ref() {
            let info = &mut self.passes[pass];
            if let Some(query) = info.query.as_mut() {
                // Ring full: the oldest result has to be consumed before reuse.
                if query.is_full() {
                    if let Some(ms) = gpu.read(query, true) {
                        info.gpu.add(ms);
                    }
                }
                gpu.begin(query);
            }
        }
    }

    /// Close the innermost span. Panics unless it was opened with `id`.
    pub fn pop_span(&mut self, id: PassId) {
        let (entry, open_id) = self.parents.pop();
        assert_eq!(open_id, id, "pop_span({id}) while span {open_id} is open");

        let entry = &self.entries[entry];
        let ms = entry.start.elapsed().as_secs_f64() * 1000.0;
        let info = &mut self.passes[entry.pass];
        info.cpu.add(ms);

        if let (Some(gpu), Some(query)) = (self.gpu.as_ref(), info.query.as_mut()) {
            gpu.end(query);
        }
    }

    /// Start a new frame: reset the span list and collect last frame's GPU
    /// times when they are available (or must be read now).
    pub fn new_frame(&mut self) {
        debug_assert!(self.parents.is_empty(), "spans left open across frames");
        self.frame_start = Instant::now();
        self.entries.clear();
        self.parents.clear();
        std::mem::swap(&mut self.current, &mut self.previous);
        self.current.clear();

        let Some(gpu) = self.gpu.as_ref() else {
            return;
        };
        gpu.device.poll(wgpu::Maintain::Poll);

        let Some(last) = self.previous.last() else {
            return;
        };
        let Some(query) = self.passes[last.pass].query.as_ref() else {
            return;
        };
        let ready = query.is_ready();
        if !ready && !query.about_to_wrap() {
            return;
        }

        let wait_start = Instant::now();
        for span in self.previous.iter() {
            let info = &mut self.passes[span.pass];
            if let Some(ms) = info.query.as_mut().and_then(|q| gpu.read(q, true)) {
                info.gpu.add(ms);
            }
        }
        if !ready {
            log::debug!(
                "Waited {:.3}ms for GPU timer queries",
                wait_start.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    /// Time since `new_frame`, in milliseconds.
    pub fn frame_elapsed_ms(&self) -> f64 {
        self.frame_start.elapsed().as_secs_f64() * 1000.0
    }

    /// Parent entry of every span recorded so far this frame.
    pub fn frame_parents(&self) -> Vec<Option<usize>> {
        self.entries.iter().map(|e| e.parent).collect()
    }

    /// Pass tree of the last completed frame, in push order.
    pub fn rows(&self) -> Vec<PassRow> {
        self.previous
            .iter()
            .map(|span| {
                let info = &self.passes[span.pass];
                PassRow {
                    name: info.name,
                    depth: span.depth,
                    cpu_ms: info.cpu.average(),
                    gpu_ms: (info.gpu.samples() > 0).then(|| info.gpu.average()),
                }
            })
            .collect()
    }

    pub fn cpu_time(&self, id: PassId) -> Option<&TimeInfo> {
        self.by_id.get(&id).map(|&p| &self.passes[p].cpu)
    }

    pub fn gpu_time(&self, id: PassId) -> Option<&TimeInfo> {
        self.by_id.get(&id).map(|&p| &self.passes[p].gpu)
    }
}
