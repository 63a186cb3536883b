//! Barrier-coordinated execution of the two-phase pipeline.
//!
//! Four threads run with fixed membership: one worker per image group and
//! one coordinator, all meeting at a single reusable barrier of party four.
//! Phase one prepares the frames through five ordered rendezvous points;
//! phase two loops the sweep. Between any two barriers every shared buffer
//! has exactly one writer, fixed by phase and step:
//!
//! ```text
//!   workers                      barrier   coordinator
//!   prepare frames, static stack   (1)
//!                                          normalize, superstack
//!                                  (2)
//!   subtract superstack            (3)
//!                                          synthesize flat
//!                                  (4)
//!   divide by flat                 (5)     -> phase two
//!   tracked stack, find objects    (A)
//!                                          tracklets, advance sweep
//!                                  (B)
//!   (next tracked stack ...)               build movers (overlapped)
//! ```
//!
//! Mover construction reads only the tracklets built in the previous
//! segment, so it safely overlaps the workers' next stacking pass. The
//! finished flag is checked on every wake from a barrier; a broken barrier
//! is termination, not an error to retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use imaging::StackedImage;

use crate::config::PipelineConfig;
use crate::coordinator::{self, Coordinator, RunGeometry};
use crate::error::PipelineError;
use crate::group::ImageGroup;
use crate::mover::MoverSet;
use crate::sweep::SweepState;
use crate::sync::{BreakOnPanic, CyclicBarrier};

/// Number of image groups a run operates on.
pub const GROUP_COUNT: usize = 3;

/// Poll interval of the pause loop.
const PAUSE_POLL: Duration = Duration::from_secs(1);

/// External control surface for a running pipeline.
///
/// Pausing takes effect at the end of a sweep iteration: the coordinator
/// sleeps between iterations and the workers park at their barrier.
#[derive(Debug, Default)]
pub struct RunControl {
    paused: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Movers sorted descending by score.
    pub movers: MoverSet,
    /// The groups with their final stacks, for display collaborators.
    pub groups: [ImageGroup; GROUP_COUNT],
    /// The star-mask superstack.
    pub superstack: StackedImage,
    /// Cross-group reference data of the run.
    pub geometry: RunGeometry,
    /// Number of sweep steps processed.
    pub steps: usize,
}

/// State shared by the four pipeline threads.
struct Shared<'a> {
    barrier: CyclicBarrier,
    config: &'a PipelineConfig,
    geometry: RunGeometry,
    sweep: RwLock<SweepState>,
    groups: [Mutex<ImageGroup>; GROUP_COUNT],
    superstack: RwLock<StackedImage>,
    flat: RwLock<StackedImage>,
    finished: AtomicBool,
}

/// Run the full two-phase pipeline to completion.
///
/// Validates the group structure, then executes phase one (preparation) and
/// phase two (the sweep) on three group workers and a coordinator thread.
/// Returns when the sweep is exhausted.
pub fn run(
    config: &PipelineConfig,
    groups: Vec<ImageGroup>,
    arcsec_per_pixel: f64,
    control: &RunControl,
) -> Result<PipelineOutcome, PipelineError> {
    if groups.len() != GROUP_COUNT {
        return Err(PipelineError::GroupCount {
            expected: GROUP_COUNT,
            found: groups.len(),
        });
    }
    for group in &groups {
        if group.frames.is_empty() {
            return Err(PipelineError::EmptyGroup { index: group.index });
        }
    }

    let mut groups: [ImageGroup; GROUP_COUNT] =
        groups.try_into().expect("length checked above");
    for group in groups.iter_mut() {
        group.set_reference_time();
    }

    let geometry = coordinator::set_reference(
        [&groups[0], &groups[1], &groups[2]],
        arcsec_per_pixel,
    );
    let sweep = SweepState::new(
        &config.sweep,
        config.detection.track_error_px,
        arcsec_per_pixel,
        geometry.max_elapse_min,
    );
    info!(
        "starting sweep: {} groups, {}x{} px, scale {:.3} arcsec/px, max elapse {:.1} min",
        GROUP_COUNT, geometry.width, geometry.height, arcsec_per_pixel, geometry.max_elapse_min
    );

    let [g0, g1, g2] = groups;
    let shared = Shared {
        barrier: CyclicBarrier::new(GROUP_COUNT + 1),
        config,
        geometry: geometry.clone(),
        sweep: RwLock::new(sweep),
        groups: [Mutex::new(g0), Mutex::new(g1), Mutex::new(g2)],
        superstack: RwLock::new(StackedImage::new(geometry.width, geometry.height)),
        flat: RwLock::new(StackedImage::new(geometry.width, geometry.height)),
        finished: AtomicBool::new(false),
    };

    let mut coordinator = Coordinator::new(geometry, config.detection.clone());
    let mut steps = 0usize;

    thread::scope(|scope| {
        for index in 0..GROUP_COUNT {
            let shared = &shared;
            scope.spawn(move || worker_loop(shared, index));
        }
        coordinator_loop(&shared, &mut coordinator, control, &mut steps);
    });

    let Shared {
        groups,
        superstack,
        geometry,
        ..
    } = shared;
    let mut movers = coordinator.movers;
    movers.sort_by_score();

    Ok(PipelineOutcome {
        movers,
        groups: groups.map(|g| g.into_inner().expect("worker threads joined")),
        superstack: superstack.into_inner().expect("worker threads joined"),
        geometry,
        steps,
    })
}

/// Per-group worker: phase-one preparation, then the phase-two stacking and
/// detection loop.
fn worker_loop(shared: &Shared<'_>, index: usize) {
    let _guard = BreakOnPanic(&shared.barrier);
    let frames_cfg = &shared.config.frames;
    let detection = &shared.config.detection;

    // Phase 1: histograms, filters, static offsets, static stack.
    {
        let mut group = shared.groups[index].lock().expect("group mutex");
        for frame in group.frames.iter_mut() {
            frame.compute_histogram(frames_cfg.black_fits_sigmas, frames_cfg.white_fits_sigmas);
            if frames_cfg.deline {
                frame.de_line();
            }
            frame.stretch();
            if frames_cfg.blur {
                frame.blur();
            }
        }
        for frame in group.frames.iter_mut() {
            frame.set_static_offset(shared.geometry.ref_point);
        }
        group.build_static_stack(frames_cfg, detection);
        debug!("group {index}: static stack ready");
    }
    if shared.barrier.wait().is_err() {
        return;
    }

    // Superstack is built while we wait here.
    if shared.barrier.wait().is_err() {
        return;
    }
    {
        let mut group = shared.groups[index].lock().expect("group mutex");
        let superstack = shared.superstack.read().expect("superstack lock");
        for frame in group.frames.iter_mut() {
            frame.subtract(&superstack);
        }
    }
    if shared.barrier.wait().is_err() {
        return;
    }

    // Flat is synthesized while we wait here.
    if shared.barrier.wait().is_err() {
        return;
    }
    if frames_cfg.flatten {
        let mut group = shared.groups[index].lock().expect("group mutex");
        let flat = shared.flat.read().expect("flat lock");
        for frame in group.frames.iter_mut() {
            frame.divide(&flat);
        }
    }
    if shared.barrier.wait().is_err() {
        return;
    }

    // Phase 2: tracked stack and object search per sweep step.
    loop {
        let step = shared.sweep.read().expect("sweep lock").step();
        {
            let mut group = shared.groups[index].lock().expect("group mutex");
            group.build_tracked_stack(
                step.motion,
                step.pa + shared.geometry.rotation,
                shared.geometry.arcsec_per_pixel,
                frames_cfg,
                detection,
            );
            group.find_objects(&step, shared.geometry.arcsec_per_pixel, detection);
        }
        if shared.barrier.wait().is_err() {
            return;
        }
        // Tracklets are built and the sweep advanced while we wait here.
        if shared.barrier.wait().is_err() {
            return;
        }
        if shared.finished.load(Ordering::Acquire) {
            return;
        }
    }
}

/// Coordinator: cross-group phase-one work, then the tracklet/mover loop.
fn coordinator_loop(
    shared: &Shared<'_>,
    coordinator: &mut Coordinator,
    control: &RunControl,
    steps: &mut usize,
) {
    let _guard = BreakOnPanic(&shared.barrier);
    let frames_cfg = &shared.config.frames;
    let detection = &shared.config.detection;

    // Phase 1. Group static stacks become ready at the first barrier.
    if shared.barrier.wait().is_err() {
        return;
    }
    {
        let mut g0 = shared.groups[0].lock().expect("group mutex");
        let mut g1 = shared.groups[1].lock().expect("group mutex");
        let mut g2 = shared.groups[2].lock().expect("group mutex");
        coordinator::normalize([&mut *g0, &mut *g1, &mut *g2]);
        let mut superstack = shared.superstack.write().expect("superstack lock");
        coordinator::build_superstack(
            [&*g0, &*g1, &*g2],
            &mut superstack,
            frames_cfg,
            detection,
        );
        debug!(
            "superstack ready, threshold {:.4}",
            superstack.threshold
        );
    }
    if shared.barrier.wait().is_err() {
        return;
    }

    // Workers subtract; the third barrier hands the frames back.
    if shared.barrier.wait().is_err() {
        return;
    }
    if frames_cfg.flatten {
        let g0 = shared.groups[0].lock().expect("group mutex");
        let g1 = shared.groups[1].lock().expect("group mutex");
        let g2 = shared.groups[2].lock().expect("group mutex");
        let mut flat = shared.flat.write().expect("flat lock");
        coordinator::build_flat([&*g0, &*g1, &*g2], &mut flat);
        debug!("synthetic flat ready");
    }
    if shared.barrier.wait().is_err() {
        return;
    }
    if shared.barrier.wait().is_err() {
        return;
    }

    // Phase 2.
    loop {
        if shared.barrier.wait().is_err() {
            return;
        }
        let step = shared.sweep.read().expect("sweep lock").step();
        {
            let g0 = shared.groups[0].lock().expect("group mutex");
            let g1 = shared.groups[1].lock().expect("group mutex");
            let g2 = shared.groups[2].lock().expect("group mutex");
            coordinator.build_tracklets([&g0.objects, &g1.objects, &g2.objects], &step);
        }
        let end = shared.sweep.write().expect("sweep lock").advance();
        if end {
            shared.finished.store(true, Ordering::Release);
        }
        *steps += 1;
        if shared.barrier.wait().is_err() {
            return;
        }

        // Overlaps the workers' next stacking pass; reads only tracklets.
        coordinator.build_movers();
        if end {
            info!(
                "sweep exhausted after {} steps, {} movers",
                steps,
                coordinator.movers.len()
            );
            return;
        }
        while control.is_paused() && !shared.finished.load(Ordering::Acquire) {
            thread::sleep(PAUSE_POLL);
        }
    }
}
