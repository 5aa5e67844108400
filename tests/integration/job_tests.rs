//! Job orchestration tests: event order, join semantics, cancellation,
//! slice faults and the model precondition.

use std::time::Duration;

use futures_util::future::join_all;

use tissue_recon::classify::TissueLabel;
use tissue_recon::error::JobError;
use tissue_recon::job::{EventKind, JobPayload, JobStatus, ModelState};
use tissue_recon::mesh::MeshFormat;
use tissue_recon::pipeline::{Pipeline, PipelineConfig};
use tissue_recon::volume::{InMemoryVolumeSource, Spacing, VolumeModel};

use super::test_utils::{
    finish, phantom_volume, phantom_volume_with_unreadable, GatedVolumeSource,
};

fn pipeline_with(slices: usize) -> Pipeline<InMemoryVolumeSource> {
    let source = InMemoryVolumeSource::new().with_volume("ct-1", phantom_volume(slices));
    Pipeline::new(source, PipelineConfig::default())
}

fn gated_pipeline(slices: usize) -> (Pipeline<GatedVolumeSource>, GatedVolumeSource) {
    let source = GatedVolumeSource::closed(
        InMemoryVolumeSource::new().with_volume("ct-1", phantom_volume(slices)),
    );
    (
        Pipeline::new(source.clone(), PipelineConfig::default()),
        source,
    )
}

// =============================================================================
// Analysis
// =============================================================================

#[tokio::test]
async fn test_analysis_events_are_ordered() {
    let pipeline = pipeline_with(5);
    let job = pipeline.analysis().start("ct-1").await;

    let mut events = job.subscribe();
    let mut received = Vec::new();
    while let Some(event) = events.next().await {
        received.push(event);
    }

    assert_eq!(received.first().map(|e| e.kind), Some(EventKind::Start));
    assert_eq!(received[0].total_images, 5);

    let progress: Vec<usize> = received
        .iter()
        .filter(|e| e.kind == EventKind::Progress)
        .map(|e| e.current_image)
        .collect();
    assert_eq!(progress, vec![1, 2, 3, 4, 5]);

    let last = received.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.progress, 100);
    assert!(matches!(last.data, Some(JobPayload::Analysis(_))));
    assert_eq!(
        received.iter().filter(|e| e.kind.is_terminal()).count(),
        1
    );
}

#[tokio::test]
async fn test_late_subscriber_sees_full_sequence() {
    let pipeline = pipeline_with(3);
    let job = pipeline.analysis().start("ct-1").await;
    finish(&job).await;

    let mut events = job.subscribe();
    let mut kinds = Vec::new();
    while let Some(event) = events.next().await {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::Start,
            EventKind::Progress,
            EventKind::Progress,
            EventKind::Progress,
            EventKind::Complete
        ]
    );
}

#[tokio::test]
async fn test_analysis_result_separates_fat() {
    let pipeline = pipeline_with(4);
    let job = pipeline.analysis().start("ct-1").await;
    assert_eq!(finish(&job).await.status, JobStatus::Complete);

    let result = pipeline.analysis().result("ct-1").await.unwrap();
    assert_eq!(result.slice_count, 4);
    assert_eq!(result.dimensions, [64, 64, 4]);
    assert!(result.skipped_slices.is_empty());

    for stats in &result.slice_stats {
        // 12x12 visceral blob
        assert_eq!(stats.visceral_fat_voxels, 144);
        assert!(stats.subcutaneous_fat_voxels > 0);
        assert!(stats.body_voxels > stats.visceral_fat_voxels + stats.subcutaneous_fat_voxels);
    }

    // 144 px * 1mm^2 = 1.44 cm^2 per slice, 4 slices of 2mm.
    assert!((result.total_visceral_fat_volume_cm3 - 4.0 * 1.44 * 0.2).abs() < 1e-9);
    assert!(result.visceral_fat_percentage > 0.0 && result.visceral_fat_percentage < 100.0);
}

#[tokio::test]
async fn test_concurrent_starts_share_one_job() {
    let (pipeline, source) = gated_pipeline(2);

    let starts = (0..8).map(|_| pipeline.analysis().start("ct-1"));
    let jobs = join_all(starts).await;

    let first = jobs[0].id();
    assert!(jobs.iter().all(|job| job.id() == first));

    source.open();
    assert_eq!(finish(&jobs[0]).await.status, JobStatus::Complete);
    assert_eq!(source.load_count(), 1);

    // A finished job is not joined: a new start creates a new job.
    let again = pipeline.analysis().start("ct-1").await;
    assert_ne!(again.id(), first);
    finish(&again).await;
}

#[tokio::test]
async fn test_cancel_discards_result() {
    let (pipeline, source) = gated_pipeline(3);
    let job = pipeline.analysis().start("ct-1").await;

    assert!(pipeline.analysis().cancel("ct-1").await);
    source.open();

    let snapshot = finish(&job).await;
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert!(pipeline.analysis().result("ct-1").await.is_none());
    assert!(!pipeline.analysis().cancel("ct-1").await);

    let events = job.events();
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Cancelled));
}

#[tokio::test]
async fn test_last_subscriber_leaving_cancels() {
    let (pipeline, source) = gated_pipeline(3);
    let job = pipeline.analysis().start("ct-1").await;

    let first = job.subscribe();
    let second = job.subscribe();
    drop(first);
    assert!(!job.is_cancelled());
    drop(second);
    assert!(job.is_cancelled());

    source.open();
    assert_eq!(finish(&job).await.status, JobStatus::Cancelled);
    assert!(pipeline.analysis().result("ct-1").await.is_none());
}

#[tokio::test]
async fn test_detached_job_survives_listener_leaving() {
    let (pipeline, source) = gated_pipeline(2);
    let job = pipeline.analysis().start("ct-1").await;
    job.detach();

    drop(job.subscribe());
    assert!(!job.is_cancelled());

    source.open();
    assert_eq!(finish(&job).await.status, JobStatus::Complete);
    assert!(pipeline.analysis().result("ct-1").await.is_some());
}

#[tokio::test]
async fn test_missing_series_fails_job() {
    let pipeline = pipeline_with(1);
    let job = pipeline.analysis().start("unknown").await;

    let snapshot = finish(&job).await;
    assert_eq!(snapshot.status, JobStatus::Error);
    assert!(snapshot.error.unwrap().contains("not found"));
    assert_eq!(job.events().last().map(|e| e.kind), Some(EventKind::Error));
}

#[tokio::test]
async fn test_unreadable_slice_is_skipped() {
    let source =
        InMemoryVolumeSource::new().with_volume("ct-1", phantom_volume_with_unreadable(3, 1));
    let pipeline = Pipeline::new(source, PipelineConfig::default());

    let job = pipeline.analysis().start("ct-1").await;
    assert_eq!(finish(&job).await.status, JobStatus::Complete);

    let result = pipeline.analysis().result("ct-1").await.unwrap();
    assert_eq!(result.skipped_slices, vec![1]);
    assert!(result.slice_stats[1].skipped);
    assert_eq!(result.slice_stats[1].visceral_fat_voxels, 0);
    assert_eq!(
        result.slice_stats[0].visceral_fat_voxels,
        result.slice_stats[2].visceral_fat_voxels
    );
}

// =============================================================================
// Model generation
// =============================================================================

#[tokio::test]
async fn test_model_requires_analysis() {
    let pipeline = pipeline_with(2);

    let err = pipeline.models().start("ct-1", None).await.unwrap_err();
    assert!(matches!(err, JobError::PreconditionUnmet { .. }));

    let status = pipeline.models().status("ct-1").await;
    assert_eq!(status.status, ModelState::NotStarted);
    assert!(pipeline.store().model_job("ct-1").await.is_none());
}

#[tokio::test]
async fn test_model_generation_and_download() {
    let pipeline = pipeline_with(3);
    finish(&pipeline.analysis().start("ct-1").await).await;

    let job = pipeline.models().start("ct-1", None).await.unwrap();
    assert_eq!(finish(&job).await.status, JobStatus::Complete);

    let status = pipeline.models().status("ct-1").await;
    assert_eq!(status.status, ModelState::Complete);
    let summary = status.data.unwrap();
    let labels: Vec<TissueLabel> = summary.tissues.iter().map(|t| t.label).collect();
    assert_eq!(
        labels,
        vec![
            TissueLabel::VisceralFat,
            TissueLabel::SubcutaneousFat,
            TissueLabel::Organ
        ]
    );
    assert!(summary.tissues.iter().all(|t| t.triangle_count > 0));

    let text = pipeline
        .models()
        .download("ct-1", MeshFormat::Text)
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("o visceral_fat"));
    assert!(text.contains("o organ"));

    let binary = pipeline
        .models()
        .download("ct-1", MeshFormat::Binary)
        .await
        .unwrap()
        .unwrap();
    assert!(binary.starts_with(b"ply\n"));

    // Both encodings are cached.
    assert_eq!(pipeline.store().exports().len().await, 2);
}

#[tokio::test]
async fn test_all_background_model_has_no_meshes() {
    let air = VolumeModel::from_slices(16, 16, Spacing::default(), vec![vec![-1000.0; 256]; 3])
        .unwrap();
    let source = InMemoryVolumeSource::new().with_volume("air", air);
    let pipeline = Pipeline::new(source, PipelineConfig::default());

    finish(&pipeline.analysis().start("air").await).await;
    let job = pipeline.models().start("air", None).await.unwrap();
    assert_eq!(finish(&job).await.status, JobStatus::Complete);

    let bundle = pipeline.store().model("air").await.unwrap();
    assert!(bundle.meshes.is_empty());
    assert_eq!(bundle.dimensions, [16, 16, 3]);

    let status = pipeline.models().status("air").await;
    assert_eq!(status.status, ModelState::Complete);
    assert!(status.data.unwrap().tissues.is_empty());

    let binary = pipeline
        .models()
        .download("air", MeshFormat::Binary)
        .await
        .unwrap()
        .unwrap();
    assert!(binary.starts_with(b"ply\n"));
    let text = pipeline
        .models()
        .download("air", MeshFormat::Text)
        .await
        .unwrap()
        .unwrap();
    assert!(!String::from_utf8_lossy(&text).contains("\no "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_racing_clear_caches_nothing() {
    for _ in 0..10 {
        let pipeline = pipeline_with(24);
        finish(&pipeline.analysis().start("ct-1").await).await;
        finish(&pipeline.models().start("ct-1", None).await.unwrap()).await;

        let models = pipeline.models().clone();
        let download =
            tokio::spawn(async move { models.download("ct-1", MeshFormat::Text).await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        pipeline.clear_series("ct-1").await;
        download.await.unwrap().unwrap();

        assert!(pipeline.store().model("ct-1").await.is_none());
        assert!(pipeline
            .models()
            .download("ct-1", MeshFormat::Text)
            .await
            .unwrap()
            .is_none());
        assert_eq!(pipeline.store().exports().len().await, 0);
    }
}

#[tokio::test]
async fn test_model_include_list() {
    let pipeline = pipeline_with(2);
    finish(&pipeline.analysis().start("ct-1").await).await;

    let job = pipeline
        .models()
        .start("ct-1", Some(vec![TissueLabel::Bone]))
        .await
        .unwrap();
    finish(&job).await;

    let bundle = pipeline.store().model("ct-1").await.unwrap();
    assert_eq!(bundle.meshes.len(), 1);
    assert_eq!(bundle.meshes[0].label, TissueLabel::Bone);
}

#[tokio::test]
async fn test_reanalysis_drops_model() {
    let pipeline = pipeline_with(2);
    finish(&pipeline.analysis().start("ct-1").await).await;
    finish(&pipeline.models().start("ct-1", None).await.unwrap()).await;
    assert!(pipeline.store().model("ct-1").await.is_some());

    finish(&pipeline.analysis().start("ct-1").await).await;

    assert!(pipeline.store().model("ct-1").await.is_none());
    assert_eq!(
        pipeline.models().status("ct-1").await.status,
        ModelState::NotStarted
    );
    assert!(pipeline
        .models()
        .download("ct-1", MeshFormat::Text)
        .await
        .unwrap()
        .is_none());
}

// =============================================================================
// Clearing
// =============================================================================

#[tokio::test]
async fn test_clear_cancels_running_job() {
    let (pipeline, source) = gated_pipeline(2);
    let job = pipeline.analysis().start("ct-1").await;

    pipeline.clear_series("ct-1").await;
    assert_eq!(job.status(), JobStatus::Cancelled);

    source.open();
    finish(&job).await;

    assert!(pipeline.analysis().result("ct-1").await.is_none());
    assert!(pipeline.analysis().status("ct-1").await.is_none());
    assert!(pipeline.store().series().await.is_empty());
}

#[tokio::test]
async fn test_clear_is_scoped_to_series() {
    let source = InMemoryVolumeSource::new()
        .with_volume("a", phantom_volume(1))
        .with_volume("b", phantom_volume(1));
    let pipeline = Pipeline::new(source, PipelineConfig::default());

    finish(&pipeline.analysis().start("a").await).await;
    finish(&pipeline.analysis().start("b").await).await;

    pipeline.clear_series("a").await;
    assert!(pipeline.analysis().result("a").await.is_none());
    assert!(pipeline.analysis().result("b").await.is_some());

    pipeline.clear_all().await;
    pipeline.clear_all().await;
    assert!(pipeline.analysis().result("b").await.is_none());
}
