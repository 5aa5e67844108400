//! Persistence tests: artifacts survive a restart and clearing removes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tissue_recon::job::ModelState;
use tissue_recon::mesh::MeshFormat;
use tissue_recon::pipeline::{Pipeline, PipelineConfig};
use tissue_recon::volume::InMemoryVolumeSource;

use super::test_utils::{finish, phantom_volume};

fn persistent_pipeline(dir: &std::path::Path) -> Pipeline<InMemoryVolumeSource> {
    let source = InMemoryVolumeSource::new().with_volume("ct/1", phantom_volume(2));
    let config = PipelineConfig {
        artifacts_dir: Some(dir.to_path_buf()),
        ..PipelineConfig::default()
    };
    Pipeline::new(source, config)
}

#[tokio::test]
async fn test_artifacts_reload_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    let expected = {
        let pipeline = persistent_pipeline(dir.path());
        finish(&pipeline.analysis().start("ct/1").await).await;
        finish(&pipeline.models().start("ct/1", None).await.unwrap()).await;
        pipeline.analysis().result("ct/1").await.unwrap()
    };

    let restarted = persistent_pipeline(dir.path());
    assert!(restarted.store().series().await.is_empty());
    assert_eq!(
        restarted.store().persisted_series().await,
        vec!["ct/1".to_string()]
    );

    let reloaded = restarted.analysis().result("ct/1").await.unwrap();
    assert_eq!(reloaded.slice_count, expected.slice_count);
    assert_eq!(reloaded.slice_stats.len(), expected.slice_stats.len());
    assert!(
        (reloaded.total_visceral_fat_volume_cm3 - expected.total_visceral_fat_volume_cm3).abs()
            < 1e-9
    );

    let status = restarted.models().status("ct/1").await;
    assert_eq!(status.status, ModelState::Complete);
    assert_eq!(status.message, "Model already exists");

    let text = restarted
        .models()
        .download("ct/1", MeshFormat::Text)
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&text).contains("o visceral_fat"));
}

#[tokio::test]
async fn test_clear_removes_persisted_artifacts() {
    let dir = tempfile::tempdir().unwrap();

    {
        let pipeline = persistent_pipeline(dir.path());
        finish(&pipeline.analysis().start("ct/1").await).await;
        pipeline.clear_series("ct/1").await;
    }

    let restarted = persistent_pipeline(dir.path());
    assert!(restarted.store().persisted_series().await.is_empty());
    assert!(restarted.analysis().result("ct/1").await.is_none());
}

#[tokio::test]
async fn test_model_can_be_built_from_reloaded_analysis() {
    let dir = tempfile::tempdir().unwrap();

    {
        let pipeline = persistent_pipeline(dir.path());
        finish(&pipeline.analysis().start("ct/1").await).await;
    }

    let restarted = persistent_pipeline(dir.path());
    let job = restarted.models().start("ct/1", None).await.unwrap();
    finish(&job).await;
    assert!(restarted.store().model("ct/1").await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clear_is_not_undone_by_concurrent_reads() {
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..30 {
        {
            let pipeline = persistent_pipeline(dir.path());
            finish(&pipeline.analysis().start("ct/1").await).await;
        }

        // Fresh process: the series only exists on disk.
        let restarted = persistent_pipeline(dir.path());
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let pipeline = restarted.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    let _ = pipeline.analysis().result("ct/1").await;
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::task::yield_now().await;
        restarted.clear_series("ct/1").await;
        stop.store(true, Ordering::SeqCst);
        reader.await.unwrap();

        assert!(restarted.analysis().result("ct/1").await.is_none());
        assert!(restarted.store().persisted_series().await.is_empty());
        assert!(restarted.store().series().await.is_empty());
    }
}
