//! The texture/normalmap fetch state machine.
//!
//! One fetch = one instance-gated attempt to bring a named texture in:
//! candidate filenames are tried in order (`name`, then the known
//! extensions, then lowercase variants), the first successful download is
//! decoded on the scheduler thread, inserted into the texture cache and
//! applied. Failures follow the error design: not-found rolls to the next
//! candidate, a decode failure abandons the verb, and either way the gate
//! is released and the cache stays clean.

use std::io::Read;
use std::sync::Arc;

use veld_core::asset::{AssetError, AssetResult, AssetSource};
use veld_core::scene::NodeId;
use veld_core::task::{TaskHandle, TaskPoll};
use veld_core::texture::{decode_texture, signature_prefix, TextureKey};
use veld_core::warn_once;

use crate::executor::{apply_bump_texture, apply_main_texture, ExecCtx};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchKind {
    /// Main/base texture slot; PNG-suggesting names select the cutout
    /// variant.
    Main,
    /// Bump-map slot plus the normal-map keyword.
    Bump,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Pending,
    /// Applied, failed or abandoned - either way the fetch is finished and
    /// the gate has been released.
    Finished,
}

pub struct TextureFetch {
    pub instance: NodeId,
    pub tag: Option<i32>,
    pub kind: FetchKind,
    pub object_path: String,
    /// Original name; the cache key regardless of which candidate hit.
    pub name: String,
    candidates: Vec<String>,
    next_candidate: usize,
    current: Option<(String, TaskHandle<AssetResult>)>,
}

impl std::fmt::Debug for TextureFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureFetch")
            .field("instance", &self.instance)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("object_path", &self.object_path)
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .field("next_candidate", &self.next_candidate)
            .field("current", &self.current.as_ref().map(|(name, _)| name))
            .finish()
    }
}

/// `name`, `name.<ext>` for each known extension, then the lowercase
/// variants of all of those, first occurrence wins.
pub fn candidate_names(name: &str) -> Vec<String> {
    const EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "dds", "dds.gz"];
    let mut out = Vec::with_capacity(14);
    let mut push = |candidate: String| {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    };
    push(name.to_string());
    for ext in EXTENSIONS {
        push(format!("{}.{}", name, ext));
    }
    let lower = name.to_ascii_lowercase();
    push(lower.clone());
    for ext in EXTENSIONS {
        push(format!("{}.{}", lower, ext));
    }
    out
}

impl TextureFetch {
    pub fn new(
        instance: NodeId,
        tag: Option<i32>,
        kind: FetchKind,
        object_path: &str,
        name: &str,
    ) -> Self {
        Self {
            instance,
            tag,
            kind,
            object_path: object_path.to_string(),
            name: name.to_string(),
            candidates: candidate_names(name),
            next_candidate: 0,
            current: None,
        }
    }

    /// Starts the next candidate download; returns `false` when the
    /// candidate list is exhausted.
    pub fn start(&mut self, assets: &dyn AssetSource, password: Option<&str>) -> bool {
        let Some(candidate) = self.candidates.get(self.next_candidate).cloned() else {
            return false;
        };
        self.next_candidate += 1;
        let handle = assets.download_asset(&self.object_path, &candidate, password);
        self.current = Some((candidate, handle));
        true
    }

    /// Advances the fetch one poll. Call once per tick until `Finished`.
    pub fn poll(&mut self, ctx: &mut ExecCtx) -> FetchStatus {
        let Some((candidate, handle)) = self.current.as_mut() else {
            // Never started (no candidates); release and finish.
            ctx.scene.end_action(self.instance);
            return FetchStatus::Finished;
        };
        let candidate = candidate.clone();
        match handle.poll() {
            TaskPoll::Pending => FetchStatus::Pending,
            TaskPoll::Ready(Ok(bytes)) => {
                self.current = None;
                self.finish_with_bytes(ctx, &candidate, bytes)
            }
            TaskPoll::Ready(Err(AssetError::NotFound(_))) | TaskPoll::Gone => {
                self.current = None;
                if self.start(ctx.assets, ctx.password) {
                    FetchStatus::Pending
                } else {
                    warn_once!(
                        format!("texture-404:{}:{}", self.object_path, self.name),
                        "no candidate found for texture `{}` under `{}`",
                        self.name,
                        self.object_path
                    );
                    ctx.scene.end_action(self.instance);
                    FetchStatus::Finished
                }
            }
            TaskPoll::Ready(Err(AssetError::Transfer(reason))) => {
                self.current = None;
                warn_once!(
                    format!("texture-io:{}:{}", self.object_path, self.name),
                    "download of `{}` failed: {}",
                    candidate,
                    reason
                );
                ctx.scene.end_action(self.instance);
                FetchStatus::Finished
            }
        }
    }

    fn finish_with_bytes(
        &mut self,
        ctx: &mut ExecCtx,
        candidate: &str,
        bytes: Vec<u8>,
    ) -> FetchStatus {
        let bytes = if candidate.to_ascii_lowercase().ends_with(".gz") {
            match gunzip(&bytes) {
                Ok(inflated) => inflated,
                Err(reason) => {
                    warn_once!(
                        format!("texture-gz:{}:{}", self.object_path, self.name),
                        "could not inflate `{}`: {}",
                        candidate,
                        reason
                    );
                    ctx.scene.end_action(self.instance);
                    return FetchStatus::Finished;
                }
            }
        } else {
            bytes
        };

        let texture = match decode_texture(&bytes) {
            // the resolved candidate name travels with the entry so cache
            // hits make the same Cutout/Opaque call as this fetch
            Ok(texture) => Arc::new(texture.with_source_name(candidate)),
            Err(err) => {
                warn_once!(
                    format!("texture-decode:{}:{}", self.object_path, self.name),
                    "decode of `{}` failed ({}), signature [{}]",
                    candidate,
                    err,
                    signature_prefix(&bytes)
                );
                ctx.scene.end_action(self.instance);
                return FetchStatus::Finished;
            }
        };

        ctx.textures.put(
            TextureKey::new(self.object_path.clone(), self.name.clone()),
            texture.clone(),
        );
        match self.kind {
            FetchKind::Main => apply_main_texture(ctx, self.instance, self.tag, texture),
            FetchKind::Bump => apply_bump_texture(ctx, self.instance, self.tag, texture),
        }
        ctx.scene.end_action(self.instance);
        FetchStatus::Finished
    }
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map(|_| out)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_start_with_the_literal_name() {
        let names = candidate_names("Wood1");
        assert_eq!(names[0], "Wood1");
        assert_eq!(names[1], "Wood1.jpg");
        assert!(names.contains(&"Wood1.dds.gz".to_string()));
        assert!(names.contains(&"wood1.png".to_string()));
    }

    #[test]
    fn lowercase_names_do_not_duplicate() {
        let names = candidate_names("stone");
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn gunzip_roundtrip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"payload").unwrap();
        let packed = encoder.finish().unwrap();
        assert_eq!(gunzip(&packed).unwrap(), b"payload");
        assert!(gunzip(&[0, 1, 2]).is_err());
    }
}
