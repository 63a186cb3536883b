//! Star-subtraction and edge-safety scenarios for the full pipeline.

mod common;

use std::f64::consts::FRAC_PI_2;

use asterope::{scheduler, RunControl};
use common::{build_groups, test_config, FieldSpec, MovingTarget};
use imaging::test_patterns::BlobSpec;

#[test]
fn test_saturated_star_is_masked_not_detected() {
    let field = FieldSpec::default();
    // A saturated star at the same sky position in every frame.
    let star = BlobSpec {
        x: 50.0,
        y: 50.0,
        peak: 1.0,
        fwhm: 3.0,
    };
    let groups = build_groups(&field, &[], &[star], 1, 5.0, 500);
    let config = test_config(0.5, 1.5);
    let control = RunControl::new();

    let outcome = scheduler::run(&config, groups, field.arcsec_per_pixel, &control).unwrap();

    // Tracked stacks at non-zero motion show nothing at the star position.
    assert!(
        outcome.movers.is_empty(),
        "static star reported as mover: {:?}",
        outcome.movers.movers()
    );

    // Star-subtraction hard-masked the core to each frame's background.
    for group in &outcome.groups {
        for frame in &group.frames {
            let core = frame.pixels[[50, 50]];
            assert!(
                (core - frame.background).abs() < 1e-4,
                "group {} star core {} vs background {}",
                group.index,
                core,
                frame.background
            );
        }
    }

    // The superstack carries the star above its mask threshold.
    assert!(outcome.superstack.pixels[[50, 50]] > outcome.superstack.threshold);
}

#[test]
fn test_object_near_edge_never_panics() {
    let field = FieldSpec::default();
    // Within three pixels of the left edge; the scan rectangle excludes it,
    // so the run must complete without reading out of bounds.
    let target = MovingTarget {
        x0: 3.0,
        y0: 50.0,
        peak: 0.5,
        fwhm: 3.0,
        motion: 1.0,
        pa: FRAC_PI_2,
    };
    let groups = build_groups(&field, &[target], &[], 1, 5.0, 600);
    let config = test_config(0.5, 1.5);
    let control = RunControl::new();

    let outcome = scheduler::run(&config, groups, field.arcsec_per_pixel, &control).unwrap();
    // Reported at most once, or not at all.
    assert!(outcome.movers.len() <= 1);
}

#[test]
fn test_multi_frame_groups_accumulate() {
    // Three frames per group: the tracked stack at the true hypothesis
    // accumulates the target across frames.
    let field = FieldSpec {
        noise_sigma: 0.005,
        ..Default::default()
    };
    let target = MovingTarget {
        x0: 70.5,
        y0: 50.0,
        peak: 0.5,
        fwhm: 3.0,
        motion: 1.0,
        pa: FRAC_PI_2,
    };
    let groups = build_groups(&field, &[target], &[], 3, 6.0, 700);
    let config = test_config(0.5, 1.5);
    let control = RunControl::new();

    let outcome = scheduler::run(&config, groups, field.arcsec_per_pixel, &control).unwrap();
    assert_eq!(
        outcome.movers.len(),
        1,
        "movers: {:?}",
        outcome.movers.movers()
    );
    let mover = &outcome.movers.movers()[0];
    assert!((mover.motion - 1.0).abs() < 0.3, "motion {}", mover.motion);
    assert!(
        (mover.pa.to_degrees() - 90.0).abs() < 12.0,
        "pa {}",
        mover.pa.to_degrees()
    );
}
