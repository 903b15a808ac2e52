//! Component H: hit counters, the compile scheduler, the predictor-driven
//! speculative-compile path, and the interpreter<->JIT invalidation
//! protocol. Owns every piece of JIT state except the translator itself
//! (`translator.rs`) and the arena bytes being compiled from.

use super::predictor::MarkovPredictor;
use super::region::{region_start_of, Tier, MAX_REGION_INSNS, REGION_BYTES};
use super::translator::{CompiledFn, Translator, EXIT_HALT, EXIT_SYSCALL_BIT};
use crate::arena::{SharedArena, PAGE_SHIFT};
use crate::decode::DecoderCache;
use crate::regs::RegFile;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// A page's hit count must cross this before its enclosing region is
/// eligible for a baseline compile.
const HOT_THRESHOLD: u64 = 200;
/// A region's hit count must cross this before it is promoted from Baseline
/// to Optimized (SPEC_FULL.md §4.G "may be promoted").
const OPTIMIZE_THRESHOLD: u64 = 2_000;

const COMPILE_QUEUE_MAX: usize = 128;
const MAX_CONCURRENT_COMPILES: usize = 1;
const COMPILE_BUDGET_PER_SECOND: u32 = 6;
const FAILURE_BACKOFF_BASE: Duration = Duration::from_secs(2);
const FAILURE_BACKOFF_CAP: Duration = Duration::from_secs(120);
const CONFIDENCE_FLOOR: f64 = 0.15;
const CONFIDENCE_CEIL: f64 = 0.95;

pub struct CompiledRegion {
    pub region_start: u64,
    pub region_end: u64,
    pub tier: Tier,
    func: CompiledFn,
}

pub enum RegionExit {
    /// Control fell off the end of the translated block or took a
    /// region-exiting branch; carries the next guest PC.
    Continue(u64),
    /// The region ended on an `ecall`.
    Syscall,
    /// The region ended the process (reserved for a future `Op::Ecall`/exit
    /// fast path; unused by the current translator but kept so
    /// `run_region`'s callers don't need to change when it is).
    Halt,
}

#[derive(Debug, Clone, Copy)]
struct CompileTask {
    region_start: u64,
    priority: f64,
    tier: Tier,
}

impl PartialEq for CompileTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl Eq for CompileTask {}
impl PartialOrd for CompileTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CompileTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // NaN priorities sort last rather than panicking `BinaryHeap::pop`.
        self.priority.partial_cmp(&other.priority).unwrap_or(Ordering::Equal)
    }
}

struct FailureState {
    count: u32,
    cooldown_until: Instant,
}

pub struct JitManager {
    translator: Translator,
    compiled_regions: HashMap<u64, CompiledRegion>,
    page_hit_counts: HashMap<u64, u64>,
    region_hit_counts: HashMap<u64, u64>,
    compile_queue: BinaryHeap<CompileTask>,
    queued_regions: std::collections::HashSet<u64>,
    failure_state: HashMap<u64, FailureState>,
    predictor: MarkovPredictor,
    last_pc: Option<u64>,
    confidence_threshold: f64,
    recent_misses: u64,
    recent_hits: u64,
    tokens: f64,
    last_refill: Instant,
    active_compiles: usize,
}

impl JitManager {
    pub fn new() -> Self {
        JitManager {
            translator: Translator::new().expect("host ISA unsupported by cranelift-native"),
            compiled_regions: HashMap::new(),
            page_hit_counts: HashMap::new(),
            region_hit_counts: HashMap::new(),
            compile_queue: BinaryHeap::new(),
            queued_regions: std::collections::HashSet::new(),
            failure_state: HashMap::new(),
            predictor: MarkovPredictor::new(),
            last_pc: None,
            confidence_threshold: 0.5,
            recent_misses: 0,
            recent_hits: 0,
            tokens: COMPILE_BUDGET_PER_SECOND as f64,
            last_refill: Instant::now(),
            active_compiles: 0,
        }
    }

    /// Called once per dispatch step before the interpreter decodes/executes
    /// `pc`. Bumps page/region hit counters and, once a page crosses the hot
    /// threshold, enqueues a baseline compile for its enclosing region.
    pub fn record_hit(&mut self, pc: u64) {
        let page = pc >> PAGE_SHIFT;
        let page_count = {
            let c = self.page_hit_counts.entry(page).or_insert(0);
            *c += 1;
            *c
        };
        let region_start = region_start_of(pc);
        let region_count = {
            let c = self.region_hit_counts.entry(region_start).or_insert(0);
            *c += 1;
            *c
        };

        if let Some(prev) = self.last_pc {
            self.record_trace_transition(prev, pc);
        }
        self.last_pc = Some(pc);

        if page_count == HOT_THRESHOLD && !self.compiled_regions.contains_key(&region_start) {
            self.enqueue(region_start, Tier::Baseline, 1.0);
        }
        if region_count == OPTIMIZE_THRESHOLD {
            if let Some(existing) = self.compiled_regions.get(&region_start) {
                if existing.tier == Tier::Baseline {
                    self.enqueue(region_start, Tier::Optimized, 1.0);
                }
            }
        }
    }

    /// Updates the Markov predictor with an observed `from_pc -> to_pc`
    /// transition and speculatively enqueues a baseline compile for a
    /// high-confidence predicted successor region.
    pub fn record_trace_transition(&mut self, from_pc: u64, to_pc: u64) {
        self.predictor.observe_transition(from_pc, to_pc);

        let miss_rate = if self.recent_hits + self.recent_misses == 0 {
            0.5
        } else {
            self.recent_misses as f64 / (self.recent_hits + self.recent_misses) as f64
        };
        // Higher queue pressure and lower miss rate raise the bar (we are
        // doing fine without speculation); higher miss rate lowers it.
        let pressure = (self.compile_queue.len() as f64) / (COMPILE_QUEUE_MAX as f64);
        let adjustment = (miss_rate - 0.5) * 0.6 - pressure * 0.2;
        self.confidence_threshold = (self.confidence_threshold - adjustment).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEIL);

        if let Some(predicted) = self.predictor.predict(Some(from_pc), to_pc) {
            let predicted_region = region_start_of(predicted);
            if !self.compiled_regions.contains_key(&predicted_region) && !self.queued_regions.contains(&predicted_region) {
                // A first-order/second-order hit alone clears the bar only
                // when the adaptive threshold has relaxed enough; confidence
                // here is a stand-in for the predictor's own hit ratio,
                // which `predict` does not currently expose per-call, so a
                // fixed "a prediction exists at all" confidence of 0.6 is
                // used and compared against the adaptive threshold.
                const PREDICTION_CONFIDENCE: f64 = 0.6;
                if PREDICTION_CONFIDENCE >= self.confidence_threshold {
                    self.enqueue(predicted_region, Tier::Baseline, PREDICTION_CONFIDENCE);
                }
            }
        }
    }

    fn enqueue(&mut self, region_start: u64, tier: Tier, confidence: f64) {
        if let Some(fail) = self.failure_state.get(&region_start) {
            if Instant::now() < fail.cooldown_until {
                return;
            }
        }
        if self.queued_regions.contains(&region_start) {
            return;
        }
        let demand = *self.region_hit_counts.get(&region_start).unwrap_or(&1);
        let miss_cost = 1.0 + (1.0 + demand as f64).log2();
        let priority = confidence.min(1.0) * miss_cost;

        if self.compile_queue.len() >= COMPILE_QUEUE_MAX {
            // Drop the lowest-priority entry to make room, per SPEC_FULL.md
            // §4.H overflow policy. `BinaryHeap` has no peek-min, so this
            // rebuilds the heap once; queue overflow is rare enough
            // (capped at 128) that this is not a hot path.
            let mut items: Vec<CompileTask> = self.compile_queue.drain().collect();
            items.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(Ordering::Equal));
            if let Some(worst) = items.pop() {
                self.queued_regions.remove(&worst.region_start);
            }
            self.compile_queue = items.into_iter().collect();
        }

        self.queued_regions.insert(region_start);
        self.compile_queue.push(CompileTask { region_start, priority, tier });
        tracing::debug!(event = "enqueued", region_start, tier = ?tier, priority);
    }

    /// Runs up to `max_concurrent_compiles` queued compiles, subject to the
    /// token-bucket rate limit and per-region cooldown. Intended to be
    /// called once per dispatch chunk from the main loop.
    pub fn process_compile_queue(&mut self, arena: &SharedArena, decoder: &mut DecoderCache) {
        self.refill_tokens();
        let mut ran = 0;
        while ran < MAX_CONCURRENT_COMPILES && self.tokens >= 1.0 {
            let Some(task) = self.compile_queue.pop() else { break };
            self.queued_regions.remove(&task.region_start);
            if let Some(fail) = self.failure_state.get(&task.region_start) {
                if Instant::now() < fail.cooldown_until {
                    continue;
                }
            }
            self.tokens -= 1.0;
            ran += 1;
            self.active_compiles += 1;
            self.compile_region(task.region_start, task.tier, arena, decoder);
            self.active_compiles -= 1;
        }
    }

    fn refill_tokens(&mut self) {
        let elapsed = self.last_refill.elapsed();
        self.tokens = (self.tokens + elapsed.as_secs_f64() * COMPILE_BUDGET_PER_SECOND as f64)
            .min(COMPILE_BUDGET_PER_SECOND as f64);
        self.last_refill = Instant::now();
    }

    /// Decodes `region_start`'s instructions from `arena` and attempts to
    /// compile them. On success, registers the compiled region (clearing any
    /// prior failure state); on failure, records it with exponential
    /// backoff. Never propagates the error — a translation failure is a
    /// transient, interpreter-absorbed event (SPEC_FULL.md §7).
    fn compile_region(&mut self, region_start: u64, tier: Tier, arena: &SharedArena, decoder: &mut DecoderCache) {
        let mut insns = Vec::with_capacity(MAX_REGION_INSNS);
        let mut pc = region_start;
        let region_end_bound = region_start + REGION_BYTES;
        for _ in 0..MAX_REGION_INSNS {
            if pc >= region_end_bound {
                break;
            }
            let insn = decoder.fetch(arena, pc);
            let len = insn.len as u64;
            let is_ecall = insn.op == crate::decode::Op::Ecall;
            insns.push(insn);
            pc += len;
            if is_ecall {
                break;
            }
        }
        if insns.is_empty() {
            return;
        }

        match self.translator.compile(region_start, &insns) {
            Ok((func, covered)) => {
                if covered == 0 {
                    return;
                }
                let mut end_pc = region_start;
                for insn in &insns[..covered] {
                    end_pc += insn.len as u64;
                }
                self.compiled_regions.insert(
                    region_start,
                    CompiledRegion { region_start, region_end: end_pc, tier, func },
                );
                self.failure_state.remove(&region_start);
                tracing::debug!(event = "compiled", region_start, tier = ?tier, insns = covered as u64);
            }
            Err(e) => {
                let entry = self.failure_state.entry(region_start).or_insert(FailureState {
                    count: 0,
                    cooldown_until: Instant::now(),
                });
                entry.count += 1;
                let backoff = FAILURE_BACKOFF_BASE
                    .saturating_mul(1u32 << entry.count.min(6))
                    .min(FAILURE_BACKOFF_CAP);
                entry.cooldown_until = Instant::now() + backoff;
                tracing::debug!(event = "cooldown", region_start, failures = entry.count as u64, backoff_secs = backoff.as_secs(), error = %e);
            }
        }
    }

    /// Returns a live compiled region's entry function, first checking
    /// every 4 KiB page the region spans for a dirty bit (SPEC_FULL.md
    /// §4.H) — self-modifying code or a permission change invalidates on
    /// sight rather than on the next `mprotect`/store alone, so invocation
    /// is always consistent with the bytes currently in the arena.
    ///
    /// Returned by value (not by reference) so the borrow on `self` ends
    /// before the caller invokes it — `run_region` does not need the
    /// manager at all.
    pub fn get_compiled_region(&mut self, pc: u64, arena: &SharedArena) -> Option<CompiledFn> {
        let region_start = region_start_of(pc);
        if pc != region_start {
            // Compiled functions only have one entry point: the region
            // start. Mid-region re-entry always falls back to the
            // interpreter, which is always correct (just slower).
            self.recent_misses += 1;
            return None;
        }
        let dirty = {
            let region = self.compiled_regions.get(&region_start)?;
            let first_page = region.region_start >> PAGE_SHIFT;
            let last_page = (region.region_end.saturating_sub(1)) >> PAGE_SHIFT;
            (first_page..=last_page).any(|p| arena.get_page_attr(p).dirty)
        };
        if dirty {
            self.invalidate_region(region_start, arena);
            self.recent_misses += 1;
            return None;
        }
        self.recent_hits += 1;
        self.compiled_regions.get(&region_start).map(|r| r.func)
    }

    /// Invokes a compiled region's native entry point, translating the exit
    /// sentinel convention into a `RegionExit`.
    ///
    /// # Safety contract
    /// The caller must ensure no other thread is concurrently mutating the
    /// arena or register file; this emulator upholds that by construction
    /// (the execution thread is the sole mutator, §5).
    pub fn run_region(&self, func: CompiledFn, regs: &RegFile, arena: &SharedArena) -> RegionExit {
        let ptr = arena.raw_ptr();
        let attrs_ptr = arena.attrs_ptr();
        let raw = unsafe { func.call(ptr, ptr, attrs_ptr) };
        let _ = regs; // registers are read/written through `ptr` by the callee
        if raw == EXIT_HALT {
            RegionExit::Halt
        } else if raw & EXIT_SYSCALL_BIT != 0 {
            RegionExit::Syscall
        } else {
            RegionExit::Continue(raw)
        }
    }

    /// Evicts every compiled region overlapping `[addr, addr+len)` and
    /// prunes its hit-counter/predictor/queue bookkeeping, per the
    /// `mprotect`/`munmap` contract in SPEC_FULL.md §4.D and §8.
    pub fn invalidate_range(&mut self, addr: u64, len: u64) {
        let end = addr.saturating_add(len.max(1));
        let victims: Vec<u64> = self
            .compiled_regions
            .values()
            .filter(|r| r.region_start < end && r.region_end > addr)
            .map(|r| r.region_start)
            .collect();
        for region_start in victims {
            self.compiled_regions.remove(&region_start);
            self.region_hit_counts.remove(&region_start);
            self.queued_regions.remove(&region_start);
            tracing::debug!(event = "invalidated", region_start, reason = "range");
        }
    }

    fn invalidate_region(&mut self, region_start: u64, arena: &SharedArena) {
        if let Some(region) = self.compiled_regions.remove(&region_start) {
            let first_page = region.region_start >> PAGE_SHIFT;
            let last_page = (region.region_end.saturating_sub(1)) >> PAGE_SHIFT;
            for p in first_page..=last_page {
                let mut attr = arena.get_page_attr(p);
                attr.dirty = false;
                arena.set_page_attr(p, attr);
            }
            tracing::debug!(event = "invalidated", region_start, reason = "dirty_page");
        }
        self.region_hit_counts.remove(&region_start);
    }

    /// `true` once the compile queue has drained and nothing is mid-compile;
    /// exposed for `--metrics` / diagnostics, not consulted by dispatch.
    pub fn steady(&self) -> bool {
        self.compile_queue.is_empty() && self.active_compiles == 0
    }

    pub fn compiled_region_count(&self) -> usize {
        self.compiled_regions.len()
    }

    pub fn queue_len(&self) -> usize {
        self.compile_queue.len()
    }
}

impl Default for JitManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, GUEST_MEMORY_BASE, PAGE_SIZE};
    use crate::decode::DecoderCache;

    fn setup() -> (SharedArena, DecoderCache) {
        let arena = Arena::new();
        arena.set_range_attr(GUEST_MEMORY_BASE & !(PAGE_SIZE - 1), PAGE_SIZE * 4, true, true, true);
        (arena, DecoderCache::new())
    }

    fn write_addi_loop(arena: &SharedArena, pc: u64) {
        // `addi x1, x1, 1` repeated a few times, encoded directly.
        let insn: u32 = 0x0010_8093; // addi x1, x1, 1
        for i in 0..4 {
            arena.write_bytes(pc + i * 4, &insn.to_le_bytes());
        }
    }

    #[test]
    fn hot_page_enqueues_a_compile() {
        let (arena, mut decoder) = setup();
        write_addi_loop(&arena, GUEST_MEMORY_BASE);
        let mut jit = JitManager::new();
        for _ in 0..HOT_THRESHOLD {
            jit.record_hit(GUEST_MEMORY_BASE);
        }
        assert_eq!(jit.queue_len(), 1);
        jit.process_compile_queue(&arena, &mut decoder);
        assert_eq!(jit.compiled_region_count(), 1);
    }

    #[test]
    fn dirty_page_invalidates_before_next_invocation() {
        let (arena, mut decoder) = setup();
        write_addi_loop(&arena, GUEST_MEMORY_BASE);
        let mut jit = JitManager::new();
        for _ in 0..HOT_THRESHOLD {
            jit.record_hit(GUEST_MEMORY_BASE);
        }
        jit.process_compile_queue(&arena, &mut decoder);
        assert!(jit.get_compiled_region(GUEST_MEMORY_BASE, &arena).is_some());

        // A store into the executable page marks it dirty; the next lookup
        // must invalidate rather than invoke stale code.
        arena.store_u64(GUEST_MEMORY_BASE, 0);
        assert!(jit.get_compiled_region(GUEST_MEMORY_BASE, &arena).is_none());
        assert_eq!(jit.compiled_region_count(), 0);
    }

    #[test]
    fn compile_queue_overflow_drops_lowest_priority() {
        let mut jit = JitManager::new();
        for i in 0..(COMPILE_QUEUE_MAX + 10) {
            jit.enqueue((i as u64) * REGION_BYTES, Tier::Baseline, 1.0);
        }
        assert!(jit.queue_len() <= COMPILE_QUEUE_MAX);
    }

    #[test]
    fn mid_region_pc_never_hits_compiled_cache() {
        let (arena, mut decoder) = setup();
        write_addi_loop(&arena, GUEST_MEMORY_BASE);
        let mut jit = JitManager::new();
        for _ in 0..HOT_THRESHOLD {
            jit.record_hit(GUEST_MEMORY_BASE);
        }
        jit.process_compile_queue(&arena, &mut decoder);
        assert!(jit.get_compiled_region(GUEST_MEMORY_BASE + 4, &arena).is_none());
    }
}
