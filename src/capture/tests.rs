use super::*;
use crate::config::{ArtifactConfig, MatchcastConfig};
use crate::error::ArtifactError;
use crate::frame::{BoundarySignal, Frame};
use crate::identity::{ArtifactName, MatchId};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> ArtifactConfig {
    ArtifactConfig {
        path: dir.path().join("matches").display().to_string(),
        timezone: "UTC".to_string(),
        ..MatchcastConfig::default().artifacts
    }
}

fn create_test_frame(id: u64, byte: u8) -> Frame {
    Frame::new(
        id,
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_705_329_052) + Duration::from_millis(id * 100),
        vec![byte; 16],
        BoundarySignal::None,
    )
}

fn start_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_705_329_052)
}

#[tokio::test]
async fn test_video_is_invisible_until_finalized() {
    let dir = TempDir::new().unwrap();
    let writer = ArtifactWriter::new(create_test_config(&dir));
    writer.prepare().await.unwrap();

    let (name, mut file) = writer.begin_video(start_time()).await.unwrap();
    assert_eq!(name.file_name("_result_screen"), "20240115_143052.mjpeg");

    for i in 0..5 {
        file.append(&create_test_frame(i, i as u8)).await.unwrap();
    }
    let final_path = writer.path_for(&name);
    assert!(!final_path.exists());
    assert!(partial_path_for(&final_path).exists());

    let path = file.finalize().await.unwrap();
    assert_eq!(path, final_path);
    assert!(!partial_path_for(&final_path).exists());

    let bytes = tokio::fs::read(&path).await.unwrap();
    assert_eq!(bytes.len(), 80);
    assert_eq!(&bytes[16..32], &[1u8; 16]);
}

#[tokio::test]
async fn test_abort_removes_partial() {
    let dir = TempDir::new().unwrap();
    let writer = ArtifactWriter::new(create_test_config(&dir));
    writer.prepare().await.unwrap();

    let (name, mut file) = writer.begin_video(start_time()).await.unwrap();
    file.append(&create_test_frame(0, 9)).await.unwrap();
    file.abort().await;

    let final_path = writer.path_for(&name);
    assert!(!final_path.exists());
    assert!(!partial_path_for(&final_path).exists());
}

#[tokio::test]
async fn test_prepare_removes_stale_partials() {
    let dir = TempDir::new().unwrap();
    let writer = ArtifactWriter::new(create_test_config(&dir));
    writer.prepare().await.unwrap();

    let stale = writer.base_dir().join("20240101_000000.mjpeg.partial");
    let keep = writer.base_dir().join("3-20240101_000000.mjpeg");
    tokio::fs::write(&stale, b"half").await.unwrap();
    tokio::fs::write(&keep, b"whole").await.unwrap();

    assert_eq!(writer.prepare().await.unwrap(), 1);
    assert!(!stale.exists());
    assert!(keep.exists());
}

#[tokio::test]
async fn test_clip_and_identity_rename() {
    let dir = TempDir::new().unwrap();
    let writer = ArtifactWriter::new(create_test_config(&dir));
    writer.prepare().await.unwrap();

    let (name, mut file) = writer.begin_video(start_time()).await.unwrap();
    file.append(&create_test_frame(0, 1)).await.unwrap();
    let video = file.finalize().await.unwrap();

    let clip_frames: Vec<Frame> = (0..3).map(|i| create_test_frame(i, 2)).collect();
    let clip = writer.write_clip(&name, &clip_frames).await.unwrap();
    assert!(clip
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("_result_screen.mjpeg"));

    let paths = ArtifactPaths { name, video, clip };
    let renamed = writer.assign_identity(&paths, MatchId(42)).await.unwrap();

    assert!(!paths.video.exists());
    assert!(renamed.video.ends_with("42-20240115_143052.mjpeg"));
    assert!(renamed.clip.ends_with("42-20240115_143052_result_screen.mjpeg"));
    assert!(renamed.video.exists() && renamed.clip.exists());

    let parsed = ArtifactName::parse("42-20240115_143052.mjpeg", writer.clip_suffix()).unwrap();
    assert_eq!(parsed, renamed.name);
}

#[tokio::test]
async fn test_identity_rename_is_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    let writer = ArtifactWriter::new(create_test_config(&dir));
    writer.prepare().await.unwrap();

    let (name, mut file) = writer.begin_video(start_time()).await.unwrap();
    file.append(&create_test_frame(0, 1)).await.unwrap();
    let video = file.finalize().await.unwrap();
    let clip = writer
        .write_clip(&name, &[create_test_frame(1, 2)])
        .await
        .unwrap();
    let paths = ArtifactPaths { name, video, clip };

    // Occupy the clip's target name so only the second rename fails
    let blocked = writer.base_dir().join("7-20240115_143052_result_screen.mjpeg");
    std::fs::create_dir(&blocked).unwrap();

    let result = writer.assign_identity(&paths, MatchId(7)).await;
    assert!(matches!(result, Err(ArtifactError::Finalize { .. })));

    assert!(paths.video.exists());
    assert!(paths.clip.exists());
    assert!(!writer.base_dir().join("7-20240115_143052.mjpeg").exists());

    std::fs::remove_dir(&blocked).unwrap();
    let renamed = writer.assign_identity(&paths, MatchId(7)).await.unwrap();
    assert!(renamed.video.exists() && renamed.clip.exists());
}

#[tokio::test]
async fn test_name_collision_moves_forward() {
    let dir = TempDir::new().unwrap();
    let writer = ArtifactWriter::new(create_test_config(&dir));
    writer.prepare().await.unwrap();

    let (first, file) = writer.begin_video(start_time()).await.unwrap();
    file.finalize().await.unwrap();
    let (second, file) = writer.begin_video(start_time()).await.unwrap();
    file.abort().await;

    assert_ne!(first, second);
    assert_eq!(
        second.file_name("_result_screen"),
        "20240115_143053.mjpeg"
    );
}
