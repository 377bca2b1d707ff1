use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};

use frame_analytics::overlay::OverlayStyle;
use frame_analytics::{
    run_batch, AnalyticsConfig, BatchOptions, FrameAnalyticsEngine, HeatmapMode,
    LabelFileBackend, SharedBackend,
};

struct Fixture {
    _dir: tempfile::TempDir,
    source: std::path::PathBuf,
    labels: std::path::PathBuf,
    root: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = dir.path().join("images");
    let labels = dir.path().join("labels");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&labels).unwrap();

    RgbImage::from_pixel(100, 100, Rgb([90, 90, 90]))
        .save(source.join("a.png"))
        .unwrap();
    RgbImage::from_pixel(80, 60, Rgb([30, 60, 90]))
        .save(source.join("b.jpg"))
        .unwrap();
    RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]))
        .save(source.join("c.png"))
        .unwrap();
    std::fs::write(source.join("broken.png"), b"not an image").unwrap();
    std::fs::write(source.join("notes.txt"), b"ignored").unwrap();

    // pedestrian and car 10 px apart, plus a truck below the confidence threshold
    std::fs::write(
        labels.join("a.txt"),
        "0 0.2 0.2 0.1 0.1 0.9\n3 0.3 0.2 0.1 0.1 0.8\n5 0.7 0.7 0.2 0.2 0.1\n",
    )
    .unwrap();
    std::fs::write(labels.join("b.txt"), "8 0.5 0.5 0.25 0.5\n").unwrap();
    std::fs::write(labels.join("broken.txt"), "3 0.5 0.5 0.1 0.1\n").unwrap();

    Fixture {
        root: dir.path().to_path_buf(),
        _dir: dir,
        source,
        labels,
    }
}

fn engine() -> FrameAnalyticsEngine {
    let config = AnalyticsConfig::default();
    let style = OverlayStyle::without_font(&config.overlay);
    FrameAnalyticsEngine::with_style(config, style)
}

fn backend(labels: &Path) -> SharedBackend {
    let backend = LabelFileBackend::new(labels, AnalyticsConfig::default().catalog)
        .expect("label backend");
    Arc::new(Mutex::new(backend))
}

fn read_report(path: &Path) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).expect("open report");
    let header: Vec<String> = reader
        .headers()
        .expect("header")
        .iter()
        .map(str::to_string)
        .collect();
    reader
        .records()
        .map(|record| {
            let record = record.expect("record");
            header
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect()
        })
        .collect()
}

#[test]
fn batch_writes_report_artifacts_and_skips_unreadable_images() {
    let fx = fixture();
    let out = fx.root.join("out");
    let options = BatchOptions::new(&fx.source, &out);

    let progress = Mutex::new(Vec::new());
    let outcome = run_batch(&options, &engine(), &backend(&fx.labels), |path| {
        progress.lock().unwrap().push(path.to_path_buf());
    })
    .expect("batch run");

    assert_eq!(progress.lock().unwrap().len(), 4);
    assert_eq!(outcome.summary.images_processed, 3);
    assert_eq!(outcome.summary.images_skipped, 1);
    assert_eq!(outcome.skipped[0].path, fx.source.join("broken.png"));
    assert_eq!(outcome.summary.total_detections, 3);
    assert_eq!(outcome.summary.highest_risk_image.as_deref(), Some("a.png"));

    let rows = read_report(&out.join("metrics.csv"));
    let order: Vec<&str> = rows.iter().map(|row| row["image"].as_str()).collect();
    assert_eq!(order, vec!["a.png", "b.jpg", "c.png"]);

    let a = &rows[0];
    assert_eq!(a["congestion_index"], "1.8");
    assert_eq!(a["proximity_risk_index"], "0.116");
    assert_eq!(a["occupancy_frac"], "0.02");
    assert_eq!(a["total_detections"], "2");
    assert_eq!(a["count_pedestrian"], "1");
    assert_eq!(a["count_car"], "1");
    assert_eq!(a["count_truck"], "0");
    assert_eq!(a["avg_min_ped_vehicle_px"], "10.0");

    let b = &rows[1];
    assert_eq!(b["congestion_index"], "2.0");
    assert_eq!(b["proximity_risk_index"], "0.0");
    assert_eq!(b["count_bus"], "1");
    assert_eq!(b["avg_min_ped_vehicle_px"], "0.0");

    let c = &rows[2];
    assert_eq!(c["total_detections"], "0");
    assert_eq!(c["congestion_index"], "0.0");

    for name in ["a.png", "b.jpg", "c.png"] {
        assert!(out.join("overlays").join(name).is_file(), "overlay for {name}");
    }
    for stem in ["a", "b", "c"] {
        let heatmap = out.join("heatmaps").join(format!("{stem}_heatmap.png"));
        assert!(heatmap.is_file(), "heatmap for {stem}");
    }
    assert!(!out.join("overlays").join("broken.png").exists());
    assert!(!out.join("heatmaps").join("broken_heatmap.png").exists());

    let overlay = image::open(out.join("overlays").join("a.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(overlay.dimensions(), (100, 100));
    assert_eq!(*overlay.get_pixel(15, 20), Rgb([255, 0, 0]));

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["images_processed"], 3);
    assert_eq!(summary["images_skipped"], 1);
    assert_eq!(summary["highest_risk_image"], "a.png");
}

#[test]
fn parallel_run_matches_sequential_run() {
    let fx = fixture();
    let sequential = fx.root.join("seq");
    let parallel = fx.root.join("par");
    let backend = backend(&fx.labels);
    let engine = engine();

    run_batch(&BatchOptions::new(&fx.source, &sequential), &engine, &backend, |_| {})
        .expect("sequential run");
    let options = BatchOptions {
        threads: 3,
        ..BatchOptions::new(&fx.source, &parallel)
    };
    run_batch(&options, &engine, &backend, |_| {}).expect("parallel run");

    assert_eq!(
        std::fs::read(sequential.join("metrics.csv")).unwrap(),
        std::fs::read(parallel.join("metrics.csv")).unwrap()
    );
    assert_eq!(
        std::fs::read(sequential.join("heatmaps").join("a_heatmap.png")).unwrap(),
        std::fs::read(parallel.join("heatmaps").join("a_heatmap.png")).unwrap()
    );
}

#[test]
fn heatmap_modes_control_heatmap_files() {
    let fx = fixture();
    let backend = backend(&fx.labels);
    let engine = engine();

    let non_empty = fx.root.join("non_empty");
    let options = BatchOptions {
        heatmap_mode: HeatmapMode::NonEmpty,
        ..BatchOptions::new(&fx.source, &non_empty)
    };
    run_batch(&options, &engine, &backend, |_| {}).expect("non-empty run");
    assert!(non_empty.join("heatmaps").join("a_heatmap.png").is_file());
    assert!(!non_empty.join("heatmaps").join("c_heatmap.png").exists());
    assert!(non_empty.join("overlays").join("c.png").is_file());

    let off = fx.root.join("off");
    let options = BatchOptions {
        heatmap_mode: HeatmapMode::Off,
        ..BatchOptions::new(&fx.source, &off)
    };
    run_batch(&options, &engine, &backend, |_| {}).expect("heatmap-off run");
    let heatmaps = std::fs::read_dir(off.join("heatmaps")).unwrap().count();
    assert_eq!(heatmaps, 0);
}

#[test]
fn single_image_source_and_confidence_threshold() {
    let fx = fixture();
    let out = fx.root.join("single");
    let options = BatchOptions {
        confidence_threshold: 0.05,
        ..BatchOptions::new(fx.source.join("a.png"), &out)
    };
    let outcome = run_batch(&options, &engine(), &backend(&fx.labels), |_| {}).expect("run");

    assert_eq!(outcome.summary.images_processed, 1);
    let rows = read_report(&out.join("metrics.csv"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["count_truck"], "1");
    assert_eq!(rows[0]["total_detections"], "3");
}

#[test]
fn empty_source_writes_header_only_report() {
    let fx = fixture();
    let empty = fx.root.join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    let out = fx.root.join("empty_out");

    let outcome =
        run_batch(&BatchOptions::new(&empty, &out), &engine(), &backend(&fx.labels), |_| {})
            .expect("run");
    assert!(outcome.report.is_empty());
    let text = std::fs::read_to_string(out.join("metrics.csv")).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.starts_with("image,congestion_index"));
}

#[test]
fn images_sharing_a_stem_keep_the_first_and_skip_the_rest() {
    let fx = fixture();
    let source = fx.root.join("shared_stem");
    std::fs::create_dir_all(&source).unwrap();
    RgbImage::from_pixel(40, 30, Rgb([0, 0, 200]))
        .save(source.join("x.bmp"))
        .unwrap();
    RgbImage::from_pixel(40, 30, Rgb([200, 0, 0]))
        .save(source.join("x.png"))
        .unwrap();
    let out = fx.root.join("shared_stem_out");

    let progress = Mutex::new(0usize);
    let options = BatchOptions {
        threads: 2,
        ..BatchOptions::new(&source, &out)
    };
    let outcome = run_batch(&options, &engine(), &backend(&fx.labels), |_| {
        *progress.lock().unwrap() += 1;
    })
    .expect("batch run");

    assert_eq!(*progress.lock().unwrap(), 2);
    assert_eq!(outcome.summary.images_processed, 1);
    assert_eq!(outcome.summary.images_skipped, 1);
    assert_eq!(outcome.skipped[0].path, source.join("x.png"));
    assert!(outcome.skipped[0].reason.contains("x.bmp"));

    let rows = read_report(&out.join("metrics.csv"));
    let images: Vec<&str> = rows.iter().map(|row| row["image"].as_str()).collect();
    assert_eq!(images, vec!["x.bmp"]);

    assert!(out.join("overlays").join("x.bmp").is_file());
    assert!(!out.join("overlays").join("x.png").exists());
    let heatmaps: Vec<_> = std::fs::read_dir(out.join("heatmaps"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(heatmaps, vec![std::ffi::OsString::from("x_heatmap.png")]);

    // no detections, so the heatmap is the kept image unchanged
    let heatmap = image::open(out.join("heatmaps").join("x_heatmap.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(*heatmap.get_pixel(5, 5), Rgb([0, 0, 200]));
}

#[test]
fn rerun_clears_artifacts_of_images_that_now_fail() {
    let fx = fixture();
    let out = fx.root.join("rerun");
    let overlays = out.join("overlays");
    let heatmaps = out.join("heatmaps");
    std::fs::create_dir_all(&overlays).unwrap();
    std::fs::create_dir_all(&heatmaps).unwrap();
    std::fs::write(overlays.join("broken.png"), b"old overlay").unwrap();
    std::fs::write(heatmaps.join("broken_heatmap.png"), b"old heatmap").unwrap();
    std::fs::write(heatmaps.join("c_heatmap.png"), b"old heatmap").unwrap();

    let options = BatchOptions {
        heatmap_mode: HeatmapMode::NonEmpty,
        ..BatchOptions::new(&fx.source, &out)
    };
    let outcome = run_batch(&options, &engine(), &backend(&fx.labels), |_| {}).expect("rerun");

    assert_eq!(outcome.summary.images_skipped, 1);
    assert!(!overlays.join("broken.png").exists());
    assert!(!heatmaps.join("broken_heatmap.png").exists());
    // c.png has no detections, so this run writes no heatmap for it
    assert!(!heatmaps.join("c_heatmap.png").exists());
    assert!(heatmaps.join("a_heatmap.png").is_file());
    assert!(overlays.join("c.png").is_file());
}
