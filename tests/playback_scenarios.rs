use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};

use shoplift_watch::annotate::font;
use shoplift_watch::config::FrameFormat;
use shoplift_watch::detect::ScriptedBackend;
use shoplift_watch::ingest::{FrameSource, MemorySource};
use shoplift_watch::playback::{CollectSink, CollectedFrame};
use shoplift_watch::{
    AlertClassRule, Annotator, CancelToken, ClassNames, Detector, FrameWriter, PipelineError,
    Playback, PlaybackState, RawDetection,
};

const RED: Rgb<u8> = Rgb([255, 0, 0]);

fn names() -> ClassNames {
    ClassNames::new(["normal", "shoplifting"])
}

fn gray_clip(n: usize) -> Vec<RgbImage> {
    (0..n)
        .map(|i| RgbImage::from_pixel(64, 48, Rgb([40 + i as u8, 40, 40])))
        .collect()
}

fn playback_with(backend: ScriptedBackend) -> (Playback, Arc<Mutex<Vec<CollectedFrame>>>) {
    let sink = CollectSink::new();
    let frames = sink.handle();
    let playback = Playback::new(
        Detector::new(backend, names()),
        Box::new(AlertClassRule::new(1, 0.5)),
        Annotator::default(),
        0.5,
    )
    .with_sink(Box::new(sink))
    .with_tick_interval(Duration::ZERO);
    (playback, frames)
}

#[test]
fn three_frame_clip_alerts_only_on_second_frame() -> anyhow::Result<()> {
    let out = tempfile::tempdir()?;
    let backend = ScriptedBackend::new()
        .on_frame(1, vec![RawDetection::new(10.0, 10.0, 50.0, 40.0, 1, 0.9)]);
    let (playback, frames) = playback_with(backend);
    let writer = FrameWriter::new(out.path(), "session", FrameFormat::Png);
    let mut playback = playback.with_sink(Box::new(writer));

    playback.open_with(Box::new(MemorySource::new("clip", gray_clip(3))))?;
    let summary = playback.run(&CancelToken::new())?;

    assert_eq!(summary.frames_emitted, 3);
    assert_eq!(summary.alert_frames, 1);
    assert_eq!(playback.state(), PlaybackState::Closed);

    let frames = frames.lock().unwrap();
    let alerts: Vec<bool> = frames.iter().map(|f| f.report.verdict.alert).collect();
    assert_eq!(alerts, vec![false, true, false]);
    assert_eq!(frames[1].report.verdict.triggers, vec![0]);
    assert_eq!(frames[1].image.get_pixel(10, 10), &RED);
    assert!(!frames[0].image.pixels().any(|p| *p == RED));

    for n in 0..3 {
        let path = out.path().join("session").join(format!("frame_{:04}.png", n));
        assert!(path.is_file(), "missing {}", path.display());
    }
    Ok(())
}

fn banner_pixels(image: &RgbImage, color: Rgb<u8>) -> usize {
    let style = Annotator::default().style().clone();
    let (bx, by) = style.banner_position;
    let band_w = font::text_width(&style.alert_banner, style.banner_scale);
    let band_h = font::text_height(style.banner_scale);
    image
        .enumerate_pixels()
        .filter(|(x, y, p)| {
            let (x, y) = (*x as i32, *y as i32);
            **p == color
                && x >= bx
                && x < bx + band_w as i32
                && y >= by
                && y < by + band_h as i32
        })
        .count()
}

#[test]
fn alert_banner_marks_only_the_alert_frame() -> anyhow::Result<()> {
    // Box in the lower right so nothing but the banner reaches the banner band.
    let backend = ScriptedBackend::new()
        .on_frame(1, vec![RawDetection::new(300.0, 90.0, 380.0, 115.0, 1, 0.9)]);
    let (mut playback, frames) = playback_with(backend);
    let clip: Vec<RgbImage> = (0..3)
        .map(|_| RgbImage::from_pixel(400, 120, Rgb([40, 40, 40])))
        .collect();
    playback.open_with(Box::new(MemorySource::new("clip", clip)))?;
    playback.run(&CancelToken::new())?;

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 3);
    assert!(banner_pixels(&frames[1].image, RED) > 0);
    assert_eq!(banner_pixels(&frames[0].image, RED), 0);
    assert_eq!(banner_pixels(&frames[2].image, RED), 0);
    assert!(!frames[0].image.pixels().any(|p| *p == RED));
    assert!(!frames[2].image.pixels().any(|p| *p == RED));
    Ok(())
}

#[test]
fn missing_source_is_unavailable_and_writes_nothing() -> anyhow::Result<()> {
    let out = tempfile::tempdir()?;
    let (playback, frames) = playback_with(ScriptedBackend::new());
    let writer = FrameWriter::for_new_session(out.path(), FrameFormat::Jpeg);
    let mut playback = playback.with_sink(Box::new(writer));

    let missing = out.path().join("missing.mp4");
    let err = playback.open(&missing.to_string_lossy()).unwrap_err();
    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    assert_eq!(playback.state(), PlaybackState::Closed);

    assert!(frames.lock().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(out.path())?.count(), 0);
    Ok(())
}

#[test]
fn inference_failure_passes_raw_frame_through() -> anyhow::Result<()> {
    let mut backend = ScriptedBackend::new().fail_on(5);
    for i in 0..10 {
        if i != 5 {
            backend = backend.on_frame(i, vec![RawDetection::new(4.0, 4.0, 30.0, 30.0, 1, 0.8)]);
        }
    }
    let (mut playback, frames) = playback_with(backend);
    let clip = gray_clip(10);
    let raw_frame_5 = clip[5].clone();
    playback.open_with(Box::new(MemorySource::new("clip", clip)))?;
    let summary = playback.run(&CancelToken::new())?;

    assert_eq!(summary.frames_emitted, 10);
    assert_eq!(summary.inference_failures, 1);
    assert_eq!(summary.alert_frames, 9);

    let frames = frames.lock().unwrap();
    let indices: Vec<u64> = frames.iter().map(|f| f.report.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<u64>>());
    for frame in frames.iter() {
        assert_eq!(frame.report.annotated, frame.report.index != 5);
    }
    assert_eq!(frames[5].image.as_raw(), raw_frame_5.as_raw());
    assert!(!frames[5].report.verdict.alert);
    assert!(frames[5].report.inference_error.is_some());
    Ok(())
}

#[test]
fn equal_confidence_never_alerts() -> anyhow::Result<()> {
    let backend = ScriptedBackend::new()
        .on_frame(0, vec![RawDetection::new(4.0, 4.0, 30.0, 30.0, 1, 0.5)]);
    let (mut playback, frames) = playback_with(backend);
    let clip = gray_clip(1);
    let raw = clip[0].clone();
    playback.open_with(Box::new(MemorySource::new("clip", clip)))?;
    playback.run(&CancelToken::new())?;

    let frames = frames.lock().unwrap();
    assert!(!frames[0].report.verdict.alert);
    // Nothing is drawn: no box above the threshold and no banner on a normal frame.
    assert_eq!(frames[0].image.as_raw(), raw.as_raw());
    Ok(())
}

#[test]
fn synthetic_stream_stops_on_cancel() -> anyhow::Result<()> {
    let (playback, frames) = playback_with(ScriptedBackend::new());
    let mut playback = playback.with_tick_interval(Duration::from_millis(1));
    playback.open("stub://stream?width=16&height=16")?;

    let cancel = CancelToken::new();
    let stopper = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        stopper.cancel();
    });
    let summary = playback.run(&cancel)?;
    handle.join().expect("cancel thread");

    assert!(summary.cancelled);
    assert!(summary.frames_emitted > 0);
    assert_eq!(frames.lock().unwrap().len() as u64, summary.frames_emitted);
    assert_eq!(playback.state(), PlaybackState::Closed);
    Ok(())
}

#[test]
fn close_is_idempotent() {
    let mut source = MemorySource::new("clip", gray_clip(2));
    source.close();
    source.close();
    assert!(source.is_closed());
}
