//! Integration tests for the run directory layout.

mod common;

use detectbatch::OutputWriter;
use detectbatch::output::{format_labels, run_timestamp};
use image::DynamicImage;
use time::macros::datetime;
use common::*;

#[test]
fn test_run_timestamp_format() {
    let at = datetime!(2024-03-07 09:05:01 UTC);
    assert_eq!(run_timestamp(at), "20240307090501");
}

#[test]
fn test_ensure_run_directory_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let results = dir.path().join("results");

    let first = OutputWriter::ensure_run_directory(&results, "20240307090501")?;
    assert_eq!(first.run_dir(), results.join("detection_20240307090501").as_path());
    std::fs::write(first.run_dir().join("keep.txt"), "earlier run")?;

    let second = OutputWriter::ensure_run_directory(&results, "20240307090501")?;
    assert_eq!(second.run_dir(), first.run_dir());
    assert_eq!(std::fs::read_to_string(second.run_dir().join("keep.txt"))?, "earlier run");

    Ok(())
}

#[test]
fn test_fresh_run_directory_skips_taken_names() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let results = dir.path().join("results");
    let started = datetime!(2024-03-07 09:05:59 UTC);

    let first = OutputWriter::create_fresh_run_directory(&results, started)?;
    assert_eq!(first.run_dir(), results.join("detection_20240307090559").as_path());

    let second = OutputWriter::create_fresh_run_directory(&results, started)?;
    assert_eq!(second.run_dir(), results.join("detection_20240307090600").as_path());

    let third = OutputWriter::create_fresh_run_directory(&results, started)?;
    assert_eq!(third.run_dir(), results.join("detection_20240307090601").as_path());

    Ok(())
}

#[test]
fn test_ensure_run_directory_fails_under_a_file() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let blocker = dir.path().join("results");
    std::fs::write(&blocker, "not a directory")?;

    let err = OutputWriter::ensure_run_directory(&blocker, "20240307090501").unwrap_err();
    assert!(matches!(err, DetectError::OutputWrite { .. }));

    Ok(())
}

#[test]
fn test_format_labels() {
    let detections = vec![
        det(0, "cat", 0.9),
        Detection::new(3, "dog", 0.25, BoundingBox::new(0, 0, 32, 16)),
    ];

    let plain = format_labels(&detections, (32, 32), false);
    assert_eq!(
        plain,
        "0 0.500000 0.500000 0.500000 0.500000\n3 0.500000 0.250000 1.000000 0.500000\n"
    );

    let with_conf = format_labels(&detections, (32, 32), true);
    let lines: Vec<&str> = with_conf.lines().collect();
    assert_eq!(lines[0], "0 0.500000 0.500000 0.500000 0.500000 0.900000");
    assert_eq!(lines[1], "3 0.500000 0.250000 1.000000 0.500000 0.250000");
}

#[test]
fn test_format_labels_empty() {
    assert_eq!(format_labels(&[], (32, 32), true), "");
}

#[test]
fn test_artifact_paths_follow_asset_stem() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let writer = OutputWriter::ensure_run_directory(dir.path(), "20240101000000")?;
    let asset = dir.path().join("photos/street.view.jpeg");

    assert_eq!(
        writer.annotated_path(&asset),
        writer.run_dir().join("street.view_detected.jpeg")
    );
    assert_eq!(writer.labels_path(&asset), writer.run_dir().join("labels/street.view.txt"));

    Ok(())
}

#[test]
fn test_crops_are_numbered_per_class() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let asset = write_image(dir.path(), "scene.png");
    let image = image::open(&asset)?;
    let writer = OutputWriter::ensure_run_directory(&dir.path().join("results"), "20240101000000")?;

    let detections = vec![
        det(0, "person", 0.9),
        Detection::new(2, "car", 0.8, BoundingBox::new(0, 0, 10, 10)),
        Detection::new(0, "person", 0.7, BoundingBox::new(20, 20, 40, 40)),
    ];
    let report = writer.write_crops(&asset, &image, &detections);
    assert!(report.is_complete());
    let written = report.written;

    let crops = writer.run_dir().join("crops");
    assert_eq!(
        written,
        vec![
            crops.join("person/scene_1.png"),
            crops.join("car/scene_1.png"),
            crops.join("person/scene_2.png"),
        ]
    );

    // The last box runs off the image and is clipped to it
    let clipped = image::open(crops.join("person/scene_2.png"))?;
    assert_eq!((clipped.width(), clipped.height()), (12, 12));
    let first = image::open(crops.join("person/scene_1.png"))?;
    assert_eq!((first.width(), first.height()), (16, 16));

    Ok(())
}

#[test]
fn test_same_stem_outputs_overwrite() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let first = write_image(dir.path(), "left/frame.png");
    let second = write_image(dir.path(), "right/frame.png");
    let writer = OutputWriter::ensure_run_directory(&dir.path().join("results"), "20240101000000")?;

    writer.write_labels(&first, &[det(0, "cat", 0.9)], (32, 32), false)?;
    let path = writer.write_labels(&second, &[det(5, "bird", 0.4)], (32, 32), false)?;

    assert_eq!(path, writer.run_dir().join("labels/frame.txt"));
    let contents = std::fs::read_to_string(&path)?;
    assert!(contents.starts_with("5 "));
    assert_eq!(contents.lines().count(), 1);

    Ok(())
}

#[test]
fn test_annotated_image_keeps_dimensions() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let asset = write_image(dir.path(), "a.png");
    let writer = OutputWriter::ensure_run_directory(&dir.path().join("results"), "20240101000000")?;

    let rendered = DynamicImage::new_rgb8(32, 32);
    let path = writer.write_annotated_image(&asset, &rendered)?;

    assert_eq!(path, writer.run_dir().join("a_detected.png"));
    let saved = image::open(&path)?;
    assert_eq!((saved.width(), saved.height()), (32, 32));

    Ok(())
}

#[test]
fn test_failed_crop_does_not_stop_the_rest() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let asset = write_image(dir.path(), "scene.png");
    let image = image::open(&asset)?;
    let writer = OutputWriter::ensure_run_directory(&dir.path().join("results"), "20240101000000")?;

    // A file where the "car" class directory should go
    std::fs::create_dir_all(writer.run_dir().join("crops"))?;
    std::fs::write(writer.run_dir().join("crops/car"), "in the way")?;

    let detections = vec![
        Detection::new(2, "car", 0.8, BoundingBox::new(0, 0, 10, 10)),
        det(0, "person", 0.9),
        Detection::new(2, "car", 0.6, BoundingBox::new(4, 4, 10, 10)),
    ];
    let report = writer.write_crops(&asset, &image, &detections);

    assert!(!report.is_complete());
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().all(|e| matches!(e, DetectError::OutputWrite { .. })));
    assert_eq!(report.written, vec![writer.run_dir().join("crops/person/scene_1.png")]);
    assert!(report.written[0].is_file());

    Ok(())
}

#[test]
fn test_crop_class_directory_stays_inside_run_dir() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let asset = write_image(dir.path(), "scene.png");
    let image = image::open(&asset)?;
    let results = dir.path().join("results");
    let writer = OutputWriter::ensure_run_directory(&results, "20240101000000")?;

    let detections = vec![
        Detection::new(0, "../escaped", 0.9, BoundingBox::new(0, 0, 8, 8)),
        Detection::new(1, "..", 0.9, BoundingBox::new(0, 0, 8, 8)),
    ];
    let report = writer.write_crops(&asset, &image, &detections);

    assert!(report.is_complete());
    assert_eq!(report.written.len(), 2);
    let crops = writer.run_dir().join("crops");
    for path in &report.written {
        assert!(path.starts_with(&crops), "{} escaped", path.display());
        assert!(path.is_file());
    }
    assert!(!writer.run_dir().join("escaped").exists());
    assert!(!results.join("escaped").exists());

    Ok(())
}
