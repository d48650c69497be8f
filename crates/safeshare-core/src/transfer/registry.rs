//! 取件码注册表
//!
//! 取件码同时也是一次性文件服务器监听的 TCP 端口。
//! 生成、检查、插入在同一把锁内完成，并发上传不会拿到相同的取件码。
//!
//! # 状态
//!
//! ```text
//! Unserved → Listening → Serving → Served
//!                │           └──→ Failed
//!                └──→ Expired
//! ```
//!
//! 进入终态后条目立即移除，`lookup` 不再解析该取件码。
//! 保留端口（例如 HTTP API 自身的端口）永远不会被分配。

use log::debug;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::{Mutex, broadcast};

use crate::error::{Result, ShareError};

/// 随机生成冲突多少次之后改为顺序扫描
const RANDOM_ATTEMPTS: usize = 64;

/// 已登记的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub code: u16,
    /// 暂存文件路径
    pub file_path: PathBuf,
    /// 发送给下载方的文件名
    pub file_name: String,
}

/// 取件码状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeState {
    Unserved,
    Listening,
    Serving,
    Served,
    Expired,
    Failed(String),
}

impl CodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CodeState::Served | CodeState::Expired | CodeState::Failed(_)
        )
    }
}

/// 状态变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEvent {
    pub code: u16,
    pub state: CodeState,
}

struct CodeEntry {
    record: FileRecord,
    state: CodeState,
    created_at: Instant,
}

pub struct CodeRegistry {
    range: RangeInclusive<u16>,
    reserved: HashSet<u16>,
    entries: Mutex<HashMap<u16, CodeEntry>>,
    events: broadcast::Sender<CodeEvent>,
}

impl CodeRegistry {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self::with_reserved(range, [])
    }

    /// 创建注册表，`reserved` 中的端口不会作为取件码分配
    pub fn with_reserved(
        range: RangeInclusive<u16>,
        reserved: impl IntoIterator<Item = u16>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            range,
            reserved: reserved.into_iter().collect(),
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<CodeEvent> {
        self.events.subscribe()
    }

    /// 为文件分配一个未被占用的取件码
    pub async fn allocate(&self, file_path: PathBuf, file_name: String) -> Result<u16> {
        self.allocate_excluding(file_path, file_name, &HashSet::new())
            .await
    }

    /// 同 [`allocate`](Self::allocate)，但跳过 `exclude` 中的取件码
    pub async fn allocate_excluding(
        &self,
        file_path: PathBuf,
        file_name: String,
        exclude: &HashSet<u16>,
    ) -> Result<u16> {
        let (min, max) = (*self.range.start(), *self.range.end());
        let mut entries = self.entries.lock().await;
        let is_free = |code: &u16| {
            !entries.contains_key(code) && !self.reserved.contains(code) && !exclude.contains(code)
        };

        let mut code = None;
        for _ in 0..RANDOM_ATTEMPTS {
            let candidate = rand::thread_rng().gen_range(min..=max);
            if is_free(&candidate) {
                code = Some(candidate);
                break;
            }
        }
        let code = code
            .or_else(|| (min..=max).find(|c| is_free(c)))
            .ok_or(ShareError::CodesExhausted { min, max })?;

        entries.insert(
            code,
            CodeEntry {
                record: FileRecord {
                    code,
                    file_path,
                    file_name,
                },
                state: CodeState::Unserved,
                created_at: Instant::now(),
            },
        );
        drop(entries);

        debug!("Allocated code {}", code);
        self.emit(code, CodeState::Unserved);
        Ok(code)
    }

    pub async fn lookup(&self, code: u16) -> Option<FileRecord> {
        let entries = self.entries.lock().await;
        entries.get(&code).map(|e| e.record.clone())
    }

    pub async fn state(&self, code: u16) -> Option<CodeState> {
        let entries = self.entries.lock().await;
        entries.get(&code).map(|e| e.state.clone())
    }

    /// `Unserved → Listening`，每个取件码只能成功一次
    pub async fn begin_listening(&self, code: u16) -> Result<FileRecord> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&code)
            .ok_or(ShareError::UnknownCode(code))?;
        if entry.state != CodeState::Unserved {
            return Err(ShareError::AlreadyStarted(code));
        }
        entry.state = CodeState::Listening;
        let record = entry.record.clone();
        drop(entries);

        self.emit(code, CodeState::Listening);
        Ok(record)
    }

    /// `Listening → Serving`
    pub async fn mark_serving(&self, code: u16) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&code) {
            entry.state = CodeState::Serving;
            drop(entries);
            self.emit(code, CodeState::Serving);
        }
    }

    /// 进入终态并移除条目
    pub async fn finish(&self, code: u16, state: CodeState) -> Option<FileRecord> {
        debug_assert!(state.is_terminal());
        let entry = self.entries.lock().await.remove(&code);
        if let Some(entry) = &entry {
            debug!(
                "Code {} finished as {:?} after {:?}",
                code,
                state,
                entry.created_at.elapsed()
            );
        }
        // 条目可能已被 clear 移除，事件照常发出
        self.emit(code, state);
        entry.map(|e| e.record)
    }

    /// 清空注册表，返回所有记录
    pub async fn clear(&self) -> Vec<FileRecord> {
        let mut entries = self.entries.lock().await;
        entries.drain().map(|(_, e)| e.record).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn emit(&self, code: u16, state: CodeState) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(CodeEvent { code, state });
    }
}
