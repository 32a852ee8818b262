//! File-based storage backend for the orders service.
//!
//! Each key is stored as one file. A key `namespace:id` maps to
//! `<storage_path>/namespace/id.bin`, so listing a namespace is a directory scan.
//! Writes go through a per-write temporary file and a rename; counters are serialized with
//! an exclusive `fs2` lock so several processes can share one directory.

use crate::{parse_counter, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use orders_types::{
	validate_config_fields, ConfigFieldType, ConfigSchema, ConfigValidationError,
	ImplementationRegistry,
};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;

const FILE_EXTENSION: &str = "bin";
const COUNTER_EXTENSION: &str = "counter";

/// File-based storage implementation.
///
/// This implementation stores data as files on the filesystem,
/// providing simple persistence without requiring external dependencies.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	/// Creates a new FileStorage instance rooted at the given directory.
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Converts a storage key to a filesystem-safe file path.
	fn get_file_path(&self, key: &str, extension: &str) -> PathBuf {
		match key.split_once(':') {
			Some((namespace, id)) => self
				.base_path
				.join(sanitize(namespace))
				.join(format!("{}.{}", sanitize(id), extension)),
			None => self
				.base_path
				.join(format!("{}.{}", sanitize(key), extension)),
		}
	}

	/// Lists `(path, is_dir)` for every entry directly inside `dir`.
	/// A missing directory has no entries.
	async fn list_dir(dir: &Path) -> Result<Vec<(PathBuf, bool)>, StorageError> {
		let mut entries = match fs::read_dir(dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut listed = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let file_type = entry
				.file_type()
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
			listed.push((entry.path(), file_type.is_dir()));
		}
		Ok(listed)
	}
}

/// Maps a data or counter file back to its key name, if it is one.
fn key_stem(path: &Path) -> Option<&str> {
	let extension = path.extension().and_then(|e| e.to_str());
	if extension != Some(FILE_EXTENSION) && extension != Some(COUNTER_EXTENSION) {
		return None;
	}
	path.file_stem().and_then(|s| s.to_str())
}

fn sanitize(part: &str) -> String {
	part.replace(['/', '\\', ':'], "_")
}

/// Read-increment-write under an exclusive file lock. Blocking; run it on
/// the blocking pool.
fn increment_locked(path: &Path) -> Result<u64, StorageError> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).map_err(|e| StorageError::Backend(e.to_string()))?;
	}
	let mut file = std::fs::OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.truncate(false)
		.open(path)
		.map_err(|e| StorageError::Backend(e.to_string()))?;
	file.lock_exclusive()
		.map_err(|e| StorageError::Backend(e.to_string()))?;

	let result = bump_counter(&mut file, path);

	if let Err(e) = FileExt::unlock(&file) {
		tracing::warn!("Failed to unlock counter file {:?}: {}", path, e);
	}
	result
}

/// Writes `value` to a fresh temporary file next to `path` and renames it
/// into place, so readers see either the old or the new contents. Blocking.
fn write_atomically(path: &Path, value: &[u8]) -> Result<(), StorageError> {
	let io_err = |e: std::io::Error| StorageError::Backend(e.to_string());
	let parent = path
		.parent()
		.ok_or_else(|| StorageError::Backend(format!("No parent directory for {:?}", path)))?;
	std::fs::create_dir_all(parent).map_err(io_err)?;

	let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
	temp.write_all(value).map_err(io_err)?;
	temp.as_file().sync_all().map_err(io_err)?;
	temp.persist(path).map_err(|e| io_err(e.error))?;
	Ok(())
}

fn bump_counter(file: &mut std::fs::File, path: &Path) -> Result<u64, StorageError> {
	let io_err = |e: std::io::Error| StorageError::Backend(e.to_string());

	let mut contents = String::new();
	file.read_to_string(&mut contents).map_err(io_err)?;
	let current = if contents.trim().is_empty() {
		0
	} else {
		parse_counter(&path.display().to_string(), contents.as_bytes())?
	};

	let next = current + 1;
	file.seek(SeekFrom::Start(0)).map_err(io_err)?;
	file.set_len(0).map_err(io_err)?;
	file.write_all(next.to_string().as_bytes()).map_err(io_err)?;
	file.sync_all().map_err(io_err)?;
	Ok(next)
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		for extension in [FILE_EXTENSION, COUNTER_EXTENSION] {
			match fs::read(self.get_file_path(key, extension)).await {
				Ok(data) => return Ok(data),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
				Err(e) => return Err(StorageError::Backend(e.to_string())),
			}
		}
		Err(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key, FILE_EXTENSION);
		tokio::task::spawn_blocking(move || write_atomically(&path, &value))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		for extension in [FILE_EXTENSION, COUNTER_EXTENSION] {
			match fs::remove_file(self.get_file_path(key, extension)).await {
				Ok(_) => {},
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
				Err(e) => return Err(StorageError::Backend(e.to_string())),
			}
		}
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		for extension in [FILE_EXTENSION, COUNTER_EXTENSION] {
			let found = fs::try_exists(self.get_file_path(key, extension))
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
			if found {
				return Ok(true);
			}
		}
		Ok(false)
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();

		for (path, is_dir) in Self::list_dir(&self.base_path).await? {
			if !is_dir {
				if let Some(stem) = key_stem(&path) {
					keys.push(stem.to_string());
				}
				continue;
			}
			let Some(namespace) = path.file_name().and_then(|n| n.to_str()) else {
				tracing::debug!("Skipping directory {:?}: name is not valid UTF-8", path);
				continue;
			};
			for (file, is_dir) in Self::list_dir(&path).await? {
				if is_dir {
					continue;
				}
				if let Some(stem) = key_stem(&file) {
					keys.push(format!("{}:{}", namespace, stem));
				}
			}
		}

		keys.retain(|key| key.starts_with(prefix));
		Ok(keys)
	}

	async fn increment(&self, key: &str) -> Result<u64, StorageError> {
		let path = self.get_file_path(key, COUNTER_EXTENSION);
		tokio::task::spawn_blocking(move || increment_locked(&path))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn health_check(&self) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path).await.map_err(|e| {
			StorageError::Unavailable(format!(
				"Cannot use storage directory {}: {}",
				self.base_path.display(),
				e
			))
		})
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ConfigValidationError> {
		validate_config_fields(config, &[("storage_path", ConfigFieldType::String)])
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema.validate(config)?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/orders")
		.to_string();

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
