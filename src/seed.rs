//! Pre-populate the restore cache from pairs of files on disk:
//! `<name>-<id>-original.<ext>` and `<name>-<id>-restored.<ext>`.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::embedded::{mime_for_extension, EmbeddedImage};
use crate::feature::Feature;
use crate::fingerprint::Fingerprint;
use crate::store::{CacheEntry, CacheStore};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Original,
    Restored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SeedName<'a> {
    id: &'a str,
    role: Role,
    ext: String,
}

fn parse_name(name: &str) -> Option<SeedName<'_>> {
    let (stem, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if !EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let (head, role) = stem.rsplit_once('-')?;
    let role = match role.to_ascii_lowercase().as_str() {
        "original" => Role::Original,
        "restored" => Role::Restored,
        _ => return None,
    };
    let (_, id) = head.rsplit_once('-')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(SeedName { id, role, ext })
}

/// An original file and the restored file sharing its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPair {
    pub original: String,
    pub restored: String,
}

/// Pair originals with restored files by id. Returns the pairs and the
/// originals that had no partner or an unusable name.
pub fn pair_files(names: &[String]) -> (Vec<SeedPair>, Vec<String>) {
    let mut pairs = Vec::new();
    let mut skipped = Vec::new();

    let originals = names.iter().filter(|name| {
        name.to_ascii_lowercase()
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| stem.ends_with("-original") && EXTENSIONS.contains(&ext))
    });

    for original in originals {
        let Some(parsed) = parse_name(original) else {
            tracing::warn!(file = %original, "skipping: invalid original filename format");
            skipped.push(original.clone());
            continue;
        };
        let restored = names.iter().find(|candidate| {
            parse_name(candidate)
                .is_some_and(|c| c.role == Role::Restored && c.id == parsed.id)
        });
        match restored {
            Some(restored) => pairs.push(SeedPair {
                original: original.clone(),
                restored: restored.clone(),
            }),
            None => {
                tracing::warn!(file = %original, id = parsed.id, "skipping: no matching restored file");
                skipped.push(original.clone());
            }
        }
    }

    (pairs, skipped)
}

fn data_url_for(name: &str, bytes: &[u8]) -> String {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    let mime = mime_for_extension(ext);
    EmbeddedImage::from_bytes(&mime, bytes).to_data_url(&mime)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub seeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Seed restore cache entries from every usable pair in `dir`.
pub async fn seed_cache(store: &dyn CacheStore, dir: &Path) -> anyhow::Result<SeedReport> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("read seed directory {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let (pairs, skipped) = pair_files(&names);
    let mut report = seed_pairs(store, dir, pairs).await;
    report.skipped = skipped.len();
    Ok(report)
}

/// Store every pair, counting the ones that could not be read or written.
async fn seed_pairs(store: &dyn CacheStore, dir: &Path, pairs: Vec<SeedPair>) -> SeedReport {
    let mut report = SeedReport::default();
    for pair in pairs {
        match seed_pair(store, dir, &pair).await {
            Ok(()) => {
                tracing::info!(original = %pair.original, restored = %pair.restored, "seeded cache entry");
                report.seeded += 1;
            }
            Err(err) => {
                tracing::error!(original = %pair.original, error = %format!("{err:#}"), "seeding failed");
                report.failed += 1;
            }
        }
    }
    report
}

async fn seed_pair(store: &dyn CacheStore, dir: &Path, pair: &SeedPair) -> anyhow::Result<()> {
    let original_path: PathBuf = dir.join(&pair.original);
    let restored_path: PathBuf = dir.join(&pair.restored);
    let (original, restored) = tokio::try_join!(
        tokio::fs::read(&original_path),
        tokio::fs::read(&restored_path)
    )
    .with_context(|| format!("read seed pair {}", pair.original))?;

    let entry = CacheEntry {
        feature: Feature::Restore,
        fingerprint: Fingerprint::of_bytes(&original),
        input: data_url_for(&pair.original, &original),
        output: data_url_for(&pair.restored, &restored),
        prompt_hash: None,
        prompt: None,
    };
    store.store(&entry).await?;
    Ok(())
}
