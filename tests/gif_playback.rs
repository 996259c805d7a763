use std::fs::File;
use std::path::Path;
use std::time::Duration;

use image::codecs::gif::GifEncoder;
use image::{Delay, Rgba, RgbaImage};

use shoplift_watch::detect::ScriptedBackend;
use shoplift_watch::ingest::{classify, GifClip};
use shoplift_watch::playback::CollectSink;
use shoplift_watch::{
    play_gif, AlertClassRule, Annotator, CancelToken, ClassNames, Detector, FrameSink, Playback,
    SourceKind,
};

fn write_gif(path: &Path, n: u8) -> anyhow::Result<()> {
    let mut encoder = GifEncoder::new(File::create(path)?);
    for i in 0..n {
        let img = RgbaImage::from_pixel(8, 6, Rgba([i * 50, 20, 200, 255]));
        encoder.encode_frame(image::Frame::from_parts(
            img,
            0,
            0,
            Delay::from_numer_denom_ms(100, 1),
        ))?;
    }
    Ok(())
}

#[test]
fn looping_gif_wraps_after_each_period() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("loop.gif");
    write_gif(&path, 3)?;
    assert_eq!(classify(&path.to_string_lossy()), SourceKind::Gif);

    let clip = GifClip::decode(&path, 100)?;
    let sink = CollectSink::new();
    let frames = sink.handle();
    let mut sinks: Vec<Box<dyn FrameSink>> = vec![Box::new(sink)];
    let shown = play_gif(
        clip,
        Duration::from_millis(1),
        &mut sinks,
        &CancelToken::new(),
        Some(6),
    );

    assert_eq!(shown, 6);
    let frames = frames.lock().unwrap();
    let indices: Vec<u64> = frames.iter().map(|f| f.report.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(frames[0].image.as_raw(), frames[3].image.as_raw());
    assert!(frames.iter().all(|f| !f.report.annotated));
    Ok(())
}

#[test]
fn cancelled_gif_loop_emits_nothing() -> anyhow::Result<()> {
    let clip = GifClip::from_frames(vec![image::RgbImage::new(4, 4); 2])?;
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut sinks: Vec<Box<dyn FrameSink>> = vec![Box::new(CollectSink::new())];
    assert_eq!(play_gif(clip, Duration::from_millis(1), &mut sinks, &cancel, None), 0);
    Ok(())
}

#[test]
fn gif_can_be_analyzed_like_a_video() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clip.gif");
    write_gif(&path, 4)?;

    let sink = CollectSink::new();
    let frames = sink.handle();
    let mut playback = Playback::new(
        Detector::new(ScriptedBackend::new(), ClassNames::new(["normal", "shoplifting"])),
        Box::new(AlertClassRule::new(1, 0.5)),
        Annotator::default(),
        0.5,
    )
    .with_sink(Box::new(sink))
    .with_tick_interval(Duration::ZERO);

    playback.open(&path.to_string_lossy())?;
    let summary = playback.run(&CancelToken::new())?;

    assert_eq!(summary.frames_emitted, 4);
    assert_eq!(frames.lock().unwrap().len(), 4);
    Ok(())
}
