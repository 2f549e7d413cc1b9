//! Scanner behaviour on synthetic 60 second clips.
//!
//! Frames are 200x100 at 10 fps. A positive "caption" (two solid boxes) and a
//! decoy (a thick X) are drawn inside the search region on a black
//! background for chosen frame ranges.

use chap_media::{
    AbortPolicy, DetectionParameters, FrameSource, MediaError, MemoryFrameSource, OffsetChoice,
    ReferencePattern, Region, ScanWindow, SceneMatcher,
};
use image::{imageops, Rgb, RgbImage};
use std::ops::Range;
use std::path::PathBuf;

const FPS: f64 = 10.0;
const CLIP_FRAMES: u64 = 600;
const FRAME_W: u32 = 200;
const FRAME_H: u32 = 100;
const GLYPH_W: u32 = 60;
const GLYPH_H: u32 = 24;
const POSITIVE_AT: (i64, i64) = (20, 20);
const DECOY_AT: (i64, i64) = (110, 40);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shown {
    Positive,
    Decoy,
    Both,
}

fn positive_glyph() -> RgbImage {
    let mut img = RgbImage::new(GLYPH_W, GLYPH_H);
    for (x, y, p) in img.enumerate_pixels_mut() {
        let square = (4..20).contains(&x) && (4..20).contains(&y);
        let bar = (30..56).contains(&x) && (8..16).contains(&y);
        if square || bar {
            *p = Rgb([255, 255, 255]);
        }
    }
    img
}

fn decoy_glyph() -> RgbImage {
    let mut img = RgbImage::new(GLYPH_W, GLYPH_H);
    for (x, y, p) in img.enumerate_pixels_mut() {
        if !(3..21).contains(&y) {
            continue;
        }
        let falling = 10.0 + 2.0 * (y as f64 - 3.0);
        let rising = 50.0 - 2.0 * (y as f64 - 3.0);
        let x = x as f64;
        if (x - falling).abs() < 3.5 || (x - rising).abs() < 3.5 {
            *p = Rgb([255, 255, 255]);
        }
    }
    img
}

/// A 60 s clip showing glyphs over the given frame ranges.
fn clip(schedule: Vec<(Range<u64>, Shown)>) -> MemoryFrameSource {
    let positive = positive_glyph();
    let decoy = decoy_glyph();
    MemoryFrameSource::from_fn(CLIP_FRAMES, FPS, move |index| {
        let mut frame = RgbImage::new(FRAME_W, FRAME_H);
        let shown = schedule
            .iter()
            .find(|(range, _)| range.contains(&index))
            .map(|(_, s)| *s);
        if matches!(shown, Some(Shown::Positive) | Some(Shown::Both)) {
            imageops::replace(&mut frame, &positive, POSITIVE_AT.0, POSITIVE_AT.1);
        }
        if matches!(shown, Some(Shown::Decoy) | Some(Shown::Both)) {
            imageops::replace(&mut frame, &decoy, DECOY_AT.0, DECOY_AT.1);
        }
        frame
    })
}

/// Frame range covering `[start_sec, start_sec + len_sec)`.
fn secs(start_sec: f64, len_sec: f64) -> Range<u64> {
    let start = (start_sec * FPS).round() as u64;
    start..start + (len_sec * FPS).round() as u64
}

fn params() -> DetectionParameters {
    DetectionParameters {
        profile: "synthetic".to_string(),
        template_path: PathBuf::from("positive.png"),
        reject_templates: vec![PathBuf::from("decoy.png")],
        threshold: 0.6,
        reject_threshold: 0.6,
        min_interval_sec: 2.0,
        frame_interval: 1,
        post_check_frames: 10,
        post_check_reject_limit: 2,
        search_region: Region::new(10, 10, 190, 90).unwrap(),
        // Bottom strip, always black: both recognition candidates tie.
        crop_region: Region::new(0, 92, 200, 100).unwrap(),
        recognize_frame_offset: 6,
        recognize_frame_offset_alt: 4,
        recognize_frame_offset_threshold: 5.0,
    }
}

fn matcher_with(params: DetectionParameters) -> SceneMatcher {
    let positive = ReferencePattern::from_image("positive", &positive_glyph());
    let decoys = if params.reject_templates.is_empty() {
        Vec::new()
    } else {
        vec![ReferencePattern::from_image("decoy", &decoy_glyph())]
    };
    SceneMatcher::new(params, positive, decoys).unwrap()
}

fn matcher() -> SceneMatcher {
    matcher_with(params())
}

fn timestamps(source: &mut MemoryFrameSource, matcher: &SceneMatcher) -> Vec<f64> {
    matcher
        .scan(source, ScanWindow::full())
        .unwrap()
        .detections
        .iter()
        .map(|d| d.timestamp)
        .collect()
}

#[test]
fn test_single_positive_yields_one_detection() {
    let mut source = clip(vec![(secs(10.0, 0.5), Shown::Positive)]);
    let outcome = matcher().scan(&mut source, ScanWindow::full()).unwrap();

    assert_eq!(outcome.detections.len(), 1);
    let d = &outcome.detections[0];
    assert!((d.timestamp - 10.0).abs() < 0.05, "timestamp {}", d.timestamp);
    assert_eq!(d.frame_index, 100);
    assert!(d.confidence >= 0.6 && d.confidence <= 1.0);
    assert_eq!(d.frame.dimensions(), (200, 8));
    assert_eq!(d.recognition_choice, OffsetChoice::Default);
    assert_eq!(d.recognition_frame_index, 106);

    assert_eq!(outcome.stats.frames_decoded, CLIP_FRAMES);
    assert_eq!(outcome.stats.accepted, 1);
    assert_eq!(outcome.stats.rejected_dedup, 4);
}

#[test]
fn test_positive_followed_by_decoy_is_rejected() {
    let mut source = clip(vec![
        (secs(10.0, 0.5), Shown::Positive),
        (secs(10.5, 1.0), Shown::Decoy),
    ]);
    let outcome = matcher().scan(&mut source, ScanWindow::full()).unwrap();
    assert!(outcome.detections.is_empty());
    assert!(outcome.stats.rejected_lookahead >= 1);
}

#[test]
fn test_close_positives_are_deduplicated() {
    let mut source = clip(vec![
        (secs(10.0, 0.3), Shown::Positive),
        (secs(11.0, 0.3), Shown::Positive),
    ]);
    let found = timestamps(&mut source, &matcher());
    assert_eq!(found.len(), 1);
    assert!((found[0] - 10.0).abs() < 0.05);
}

#[test]
fn test_detections_are_ordered_and_spaced() {
    let mut source = clip(vec![
        (secs(5.0, 0.5), Shown::Positive),
        (secs(20.0, 0.5), Shown::Positive),
        (secs(21.0, 0.5), Shown::Positive),
        (secs(40.0, 0.5), Shown::Positive),
    ]);
    let outcome = matcher().scan(&mut source, ScanWindow::full()).unwrap();
    let detections = &outcome.detections;
    assert_eq!(detections.len(), 3);

    for pair in detections.windows(2) {
        assert!(pair[0].frame_index < pair[1].frame_index);
        assert!(pair[1].timestamp - pair[0].timestamp >= 2.0);
    }
    for d in detections {
        assert!((d.timestamp - d.frame_index as f64 / FPS).abs() < 1e-9);
    }
}

#[test]
fn test_same_frame_decoy_never_detects() {
    let mut source = clip(vec![(secs(10.0, 1.0), Shown::Both)]);
    let outcome = matcher().scan(&mut source, ScanWindow::full()).unwrap();
    assert!(outcome.detections.is_empty());
    assert_eq!(outcome.stats.rejected_decoy, 10);
}

#[test]
fn test_same_frame_decoy_does_not_reset_dedup() {
    // Rejected at 10 s on the same frame; the positive at 11 s is still accepted.
    let mut source = clip(vec![
        (secs(10.0, 0.3), Shown::Both),
        (secs(11.0, 0.3), Shown::Positive),
    ]);
    let found = timestamps(&mut source, &matcher());
    assert_eq!(found.len(), 1);
    assert!((found[0] - 11.0).abs() < 0.05);
}

#[test]
fn test_lookahead_reject_resets_dedup() {
    // Rejected at 10 s by lookahead; 11 s falls inside min_interval of that
    // attempt, 13 s does not.
    let mut source = clip(vec![
        (secs(10.0, 0.2), Shown::Positive),
        (secs(10.2, 0.6), Shown::Decoy),
        (secs(11.0, 0.2), Shown::Positive),
        (secs(13.0, 0.2), Shown::Positive),
    ]);
    let found = timestamps(&mut source, &matcher());
    assert_eq!(found.len(), 1);
    assert!((found[0] - 13.0).abs() < 0.05, "found {:?}", found);
}

#[test]
fn test_lookahead_below_limit_accepts() {
    // A single decoy frame in the window stays under the limit of 2.
    let mut source = clip(vec![
        (secs(10.0, 0.5), Shown::Positive),
        (secs(10.5, 0.1), Shown::Decoy),
    ]);
    let found = timestamps(&mut source, &matcher());
    assert_eq!(found.len(), 1);
}

#[test]
fn test_zero_reject_limit_rejects_every_candidate() {
    let mut p = params();
    p.post_check_reject_limit = 0;
    let mut source = clip(vec![(secs(10.0, 0.5), Shown::Positive)]);
    let found = timestamps(&mut source, &matcher_with(p));
    assert!(found.is_empty());
}

#[test]
fn test_lookahead_disabled_without_decoys() {
    let mut p = params();
    p.reject_templates.clear();
    let mut source = clip(vec![
        (secs(10.0, 0.5), Shown::Positive),
        (secs(10.5, 1.0), Shown::Decoy),
    ]);
    let found = timestamps(&mut source, &matcher_with(p));
    assert_eq!(found.len(), 1);
}

#[test]
fn test_frame_interval_sampling() {
    let mut p = params();
    p.frame_interval = 4;
    // Visible on frames 101..=103 only: never sampled (100, 104 are).
    let mut source = clip(vec![(101..104, Shown::Positive)]);
    let outcome = matcher_with(p.clone()).scan(&mut source, ScanWindow::full()).unwrap();
    assert!(outcome.detections.is_empty());
    assert_eq!(outcome.stats.frames_sampled, CLIP_FRAMES / 4);

    let mut source = clip(vec![(101..106, Shown::Positive)]);
    let outcome = matcher_with(p).scan(&mut source, ScanWindow::full()).unwrap();
    assert_eq!(outcome.detections.len(), 1);
    assert_eq!(outcome.detections[0].frame_index, 104);
}

#[test]
fn test_scan_window_limits_range() {
    let mut source = clip(vec![
        (secs(10.0, 0.5), Shown::Positive),
        (secs(30.0, 0.5), Shown::Positive),
    ]);
    let window = ScanWindow::from_seconds(20.0, Some(20.0), FPS);
    let outcome = matcher().scan(&mut source, window).unwrap();
    assert_eq!(outcome.detections.len(), 1);
    assert_eq!(outcome.detections[0].frame_index, 300);
    assert_eq!(outcome.stats.frames_decoded, 200);
}

#[test]
fn test_cursor_survives_lookahead_and_selection() {
    // The frames right after an accepted detection are still scanned in order.
    let mut source = clip(vec![
        (secs(10.0, 0.1), Shown::Positive),
        (secs(12.1, 0.1), Shown::Positive),
    ]);
    let outcome = matcher().scan(&mut source, ScanWindow::full()).unwrap();
    let frames: Vec<u64> = outcome.detections.iter().map(|d| d.frame_index).collect();
    assert_eq!(frames, vec![100, 121]);
    assert_eq!(source.position(), CLIP_FRAMES);
}

#[test]
fn test_decode_error_all_or_nothing() {
    let mut source =
        clip(vec![(secs(10.0, 0.5), Shown::Positive)]).with_decode_error_at(300);
    let err = matcher().scan(&mut source, ScanWindow::full()).unwrap_err();
    match err {
        MediaError::ScanAborted {
            frame_index,
            ref partial,
            ..
        } => {
            assert_eq!(frame_index, 300);
            assert!(partial.is_empty());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_decode_error_resumable_keeps_partial() {
    let mut source =
        clip(vec![(secs(10.0, 0.5), Shown::Positive)]).with_decode_error_at(300);
    let err = matcher()
        .with_abort_policy(AbortPolicy::Resumable)
        .scan(&mut source, ScanWindow::full())
        .unwrap_err();
    let partial = err.into_partial_detections();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].frame_index, 100);
}

#[test]
fn test_decode_error_inside_lookahead_aborts() {
    let mut source =
        clip(vec![(secs(10.0, 0.5), Shown::Positive)]).with_decode_error_at(103);
    let err = matcher().scan(&mut source, ScanWindow::full()).unwrap_err();
    assert!(matches!(err, MediaError::ScanAborted { frame_index: 100, .. }));
}

#[test]
fn test_pattern_larger_than_search_region_is_config_error() {
    let mut p = params();
    p.search_region = Region::new(0, 0, 40, 40).unwrap();
    let positive = ReferencePattern::from_image("positive", &positive_glyph());
    let err = SceneMatcher::new(p, positive, Vec::new()).unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_scan_is_deterministic() {
    let schedule = vec![
        (secs(7.0, 0.5), Shown::Positive),
        (secs(25.0, 0.5), Shown::Positive),
        (secs(25.5, 0.5), Shown::Decoy),
        (secs(44.0, 0.5), Shown::Positive),
    ];
    let mut a = clip(schedule.clone());
    let mut b = clip(schedule);
    let m = matcher();
    let first = m.scan(&mut a, ScanWindow::full()).unwrap();
    let second = m.scan(&mut b, ScanWindow::full()).unwrap();

    let key = |o: &chap_media::ScanOutcome| {
        o.detections
            .iter()
            .map(|d| (d.frame_index, d.recognition_frame_index, d.frame.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(key(&first), key(&second));
    assert_eq!(first.detections.len(), 2);
}
