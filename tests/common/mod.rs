#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, RgbImage};
use image_intake::{config::PipelineSettings, db, state::AppState};
use std::{io::Cursor, sync::Arc};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

pub const BUCKET: &str = "product-images";

/// Service wiring over a throwaway storage root and SQLite file.
pub struct Harness {
    pub state: AppState,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(PipelineSettings::default()).await
    }

    pub async fn with_settings(settings: PipelineSettings) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}/meta.db", dir.path().display());
        let pool = db::connect(&url).await.expect("connect");
        db::run_migrations(&pool).await.expect("migrate");

        let state = AppState::new(Arc::new(pool), dir.path(), [BUCKET], settings)
            .expect("state");
        Self { state, _dir: dir }
    }

    /// Read a stored derivative back and decode it.
    pub async fn stored_image(&self, key: &str) -> (String, DynamicImage) {
        let (meta, mut file) = self
            .state
            .assets
            .open_asset(BUCKET, key)
            .await
            .expect("asset stored");
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await.expect("read asset");
        let decoded = image::load_from_memory(&bytes).expect("decodable derivative");
        (meta.content_type, decoded)
    }

    pub async fn asset_exists(&self, key: &str) -> bool {
        self.state.assets.asset_metadata(BUCKET, key).await.is_ok()
    }
}

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

pub fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient(width, height)
        .write_to(&mut out, format)
        .expect("encode fixture");
    out.into_inner()
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

pub fn bmp(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Bmp)
}
