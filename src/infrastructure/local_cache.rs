//! 本地答案缓存
//!
//! 按会话 ID 存放最近一次的完整答案集，写入是同步直写的，且永不返回错误：
//! 磁盘层失败只记日志，内存层依然可用。

use crate::models::AnswerSet;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// 本地答案缓存
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    entries: Arc<Mutex<HashMap<String, AnswerSet>>>,
    dir: Option<PathBuf>,
}

impl LocalCache {
    /// 只在内存中缓存
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 同时写入目录，每个会话一个 JSON 文件
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("⚠️ 无法创建缓存目录 {}: {}，仅使用内存缓存", dir.display(), e);
            return Self::in_memory();
        }
        Self {
            entries: Arc::default(),
            dir: Some(dir),
        }
    }

    pub fn put(&self, session_id: &str, answers: &AnswerSet) {
        self.lock().insert(session_id.to_string(), answers.clone());

        let Some(path) = self.path_for(session_id) else {
            return;
        };
        let bytes = match serde_json::to_vec(answers) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("⚠️ 答案缓存序列化失败: {}", e);
                return;
            }
        };
        // 先写临时文件再改名，避免半截文件
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &path)) {
            warn!("⚠️ 写入答案缓存失败 {}: {}", path.display(), e);
        }
    }

    /// 读取缓存，没有时返回空答案集
    pub fn get(&self, session_id: &str) -> AnswerSet {
        if let Some(answers) = self.lock().get(session_id) {
            return answers.clone();
        }

        let Some(path) = self.path_for(session_id) else {
            return AnswerSet::new();
        };
        let answers = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<AnswerSet>(&bytes) {
                Ok(answers) => answers,
                Err(e) => {
                    warn!("⚠️ 答案缓存已损坏 {}: {}", path.display(), e);
                    return AnswerSet::new();
                }
            },
            Err(_) => return AnswerSet::new(),
        };

        debug!("从磁盘恢复答案缓存: {} 题", answers.len());
        self.lock().insert(session_id.to_string(), answers.clone());
        answers
    }

    pub fn clear(&self, session_id: &str) {
        self.lock().remove(session_id);
        if let Some(path) = self.path_for(session_id) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("⚠️ 删除答案缓存失败 {}: {}", path.display(), e);
                }
            }
        }
    }

    /// 文件名里的会话 ID 做十六进制编码，不同 ID 永远对应不同文件
    fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        let encoded: String = session_id.bytes().map(|b| format!("{:02x}", b)).collect();
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("exam_answers_{}.json", encoded)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AnswerSet>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
