use std::fs;
use std::path::Path;

use shoplift_watch::dataset::{self, DatasetExporter, ExportOptions, Split};
use shoplift_watch::detect::ScriptedBackend;
use shoplift_watch::ingest::{FrameSource, SyntheticSource};
use shoplift_watch::{ClassNames, Detector, PipelineError, RawDetection};

fn fake_videos(root: &Path, folder: &str, count: usize) -> anyhow::Result<()> {
    let dir = root.join(folder);
    fs::create_dir_all(&dir)?;
    for i in 0..count {
        fs::write(dir.join(format!("{}_{}.mp4", folder, i)), b"not a real video")?;
    }
    Ok(())
}

fn detector() -> Detector {
    // Frame 1 has one box above the floor and one below; frame 2 only a weak box.
    let backend = ScriptedBackend::new()
        .on_frame(
            1,
            vec![
                RawDetection::new(64.0, 64.0, 320.0, 480.0, 0, 0.9),
                RawDetection::new(0.0, 0.0, 32.0, 32.0, 0, 0.3),
            ],
        )
        .on_frame(2, vec![RawDetection::new(10.0, 10.0, 60.0, 60.0, 0, 0.5)]);
    Detector::new(backend, ClassNames::new(["normal", "shoplifting"]))
}

fn synthetic_opener(_path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    let source = SyntheticSource::parse("stub://clip?frames=4&width=96&height=72")?;
    Ok(Box::new(source))
}

fn failing_opener(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::source_unavailable(
        path.to_string_lossy(),
        "cannot decode",
    ))
}

#[test]
fn exports_yolo_layout_from_labeled_folders() -> anyhow::Result<()> {
    let videos = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    fake_videos(videos.path(), "shoplifting", 3)?;
    fake_videos(videos.path(), "normal", 3)?;

    let root = out.path().join("temp_dataset");
    let mut exporter = DatasetExporter::new(detector(), ExportOptions::new(&root))
        .with_opener(Box::new(synthetic_opener));
    let summary = exporter.export(
        &videos.path().join("shoplifting"),
        &videos.path().join("normal"),
    )?;

    assert_eq!(summary.videos_skipped, 0);
    assert_eq!(summary.frames_seen, 24);
    for split in Split::ALL {
        let counts = summary.counts(split);
        assert!(counts.videos >= 1, "{:?} is empty", split);
        // Only frame 1 of each video clears the confidence floor.
        assert_eq!(counts.images, counts.videos);

        let images = root.join(split.dir_name()).join("images");
        let labels = root.join(split.dir_name()).join("labels");
        assert_eq!(fs::read_dir(&images)?.count(), counts.videos);
        for entry in fs::read_dir(&labels)? {
            let path = entry?.path();
            let stem = path.file_stem().unwrap().to_string_lossy().to_string();
            assert!(stem.ends_with("_2"), "unexpected label file {}", stem);
            assert!(images.join(format!("{}.jpg", stem)).is_file());

            let body = fs::read_to_string(&path)?;
            let lines: Vec<&str> = body.lines().collect();
            assert_eq!(lines.len(), 1);
            let fields: Vec<&str> = lines[0].split_whitespace().collect();
            assert_eq!(fields.len(), 5);
            let expected_class = if stem.starts_with("shoplifting") { "1" } else { "0" };
            assert_eq!(fields[0], expected_class);
            for value in &fields[1..] {
                let v: f32 = value.parse()?;
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }
    assert_eq!(
        summary.train.videos + summary.val.videos + summary.test.videos,
        6
    );

    let manifest = fs::read_to_string(&summary.manifest)?;
    assert!(summary.manifest.ends_with(dataset::DATASET_YAML));
    assert!(manifest.contains("nc: 2"));
    assert!(manifest.contains("normal"));
    assert!(manifest.contains("shoplifting"));
    assert!(manifest.contains("train/images"));

    dataset::cleanup(&root)?;
    assert!(!root.exists());
    Ok(())
}

fn every_frame_detector() -> Detector {
    let mut backend = ScriptedBackend::new();
    for i in 0..4 {
        backend = backend.on_frame(i, vec![RawDetection::new(64.0, 64.0, 320.0, 480.0, 0, 0.9)]);
    }
    Detector::new(backend, ClassNames::new(["normal", "shoplifting"]))
}

fn files_in(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

fn class_of(label_file: &Path) -> anyhow::Result<String> {
    let body = fs::read_to_string(label_file)?;
    let first = body.split_whitespace().next().unwrap_or_default();
    Ok(first.to_string())
}

#[test]
fn one_video_per_class_still_fills_every_split() -> anyhow::Result<()> {
    let videos = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    for folder in ["shoplifting", "normal"] {
        fs::create_dir_all(videos.path().join(folder))?;
        fs::write(videos.path().join(folder).join("a.mp4"), b"not a real video")?;
    }

    let root = out.path().join("temp_dataset");
    let mut exporter = DatasetExporter::new(every_frame_detector(), ExportOptions::new(&root))
        .with_opener(Box::new(synthetic_opener));
    let summary = exporter.export(
        &videos.path().join("shoplifting"),
        &videos.path().join("normal"),
    )?;

    assert_eq!(summary.frames_seen, 8);
    let mut on_disk = 0;
    for split in Split::ALL {
        let images = files_in(&root.join(split.dir_name()).join("images"))?;
        let labels = files_in(&root.join(split.dir_name()).join("labels"))?;
        assert!(!images.is_empty(), "{:?} has no images", split);
        assert_eq!(images.len(), summary.counts(split).images);
        assert_eq!(labels.len(), images.len());
        assert!(summary.counts(split).videos >= 1);
        on_disk += images.len();
    }
    assert_eq!(on_disk, 8);
    Ok(())
}

#[test]
fn same_stem_in_both_folders_keeps_both_labels() -> anyhow::Result<()> {
    let videos = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    for folder in ["shoplifting", "normal"] {
        fs::create_dir_all(videos.path().join(folder))?;
        fs::write(videos.path().join(folder).join("a.mp4"), b"not a real video")?;
    }
    fs::write(videos.path().join("normal").join("b.mp4"), b"not a real video")?;

    let root = out.path().join("temp_dataset");
    let mut exporter = DatasetExporter::new(detector(), ExportOptions::new(&root))
        .with_opener(Box::new(synthetic_opener));
    let summary = exporter.export(
        &videos.path().join("shoplifting"),
        &videos.path().join("normal"),
    )?;

    let mut labels = Vec::new();
    for split in Split::ALL {
        let dir = root.join(split.dir_name()).join("labels");
        assert_eq!(files_in(&dir)?.len(), summary.counts(split).labels);
        for name in files_in(&dir)? {
            labels.push((name.clone(), class_of(&dir.join(&name))?));
        }
    }
    labels.sort();
    assert_eq!(
        labels,
        vec![
            ("normal_a_2.txt".to_string(), "0".to_string()),
            ("normal_b_2.txt".to_string(), "0".to_string()),
            ("shoplifting_a_2.txt".to_string(), "1".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn unreadable_videos_are_skipped() -> anyhow::Result<()> {
    let videos = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    fake_videos(videos.path(), "shoplifting", 2)?;
    fake_videos(videos.path(), "normal", 1)?;

    let mut exporter =
        DatasetExporter::new(detector(), ExportOptions::new(out.path().join("ds")))
            .with_opener(Box::new(failing_opener));
    let summary = exporter.export(
        &videos.path().join("shoplifting"),
        &videos.path().join("normal"),
    )?;

    assert_eq!(summary.videos_skipped, 3);
    assert_eq!(summary.frames_seen, 0);
    assert!(summary.manifest.is_file());
    Ok(())
}

#[test]
fn empty_folders_are_an_error() -> anyhow::Result<()> {
    let videos = tempfile::tempdir()?;
    fs::create_dir_all(videos.path().join("shoplifting"))?;
    fs::create_dir_all(videos.path().join("normal"))?;
    let out = tempfile::tempdir()?;

    let mut exporter = DatasetExporter::new(detector(), ExportOptions::new(out.path()));
    assert!(exporter
        .export(
            &videos.path().join("shoplifting"),
            &videos.path().join("normal"),
        )
        .is_err());
    Ok(())
}
