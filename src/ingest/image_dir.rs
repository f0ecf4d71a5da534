#![cfg(feature = "ingest-image")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Still images from a local directory, in file-name order.
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    repeat: bool,
    frames_captured: u64,
}

impl ImageDirSource {
    pub fn new<P: AsRef<Path>>(dir: P, repeat: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(anyhow!("{} is not a directory", dir.display()));
        }
        Ok(Self {
            dir,
            files: Vec::new(),
            cursor: 0,
            repeat,
            frames_captured: 0,
        })
    }

    fn scan(&mut self) -> Result<()> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
        {
            let path = entry?.path();
            let supported = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)));
            if supported && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no jpeg/png images in {}", self.dir.display()));
        }
        self.files = files;
        self.cursor = 0;
        Ok(())
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        self.scan()?;
        log::info!(
            "frame source connected: {} ({} images)",
            self.dir.display(),
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.cursor >= self.files.len() {
            if !self.repeat || self.files.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;
        let rgb = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        self.frames_captured += 1;
        Ok(Some(Frame::new(rgb.into_raw(), width, height)))
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            origin: self.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_png_images_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbImage::from_pixel(4, 2, image::Rgb([1, 2, 3])).save(dir.path().join("b.png"))?;
        image::RgbImage::from_pixel(3, 3, image::Rgb([9, 9, 9])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "skip")?;

        let mut source = ImageDirSource::new(dir.path(), false)?;
        source.connect()?;
        let first = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!((first.width, first.height), (3, 3));
        let second = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!(&second.pixels()[..3], &[1, 2, 3]);
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageDirSource::new(dir.path(), true)?;
        assert!(source.connect().is_err());
        Ok(())
    }
}
