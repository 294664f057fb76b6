//! 答案数据
//!
//! `AnswerSet` 只增不删：每次编辑都是覆盖写入，题目 ID 一旦出现就不会被移除。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单题答案
///
/// 单选/判断是标量，多选是数组，填空/简答是文本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Number(serde_json::Number),
    Text(String),
    Choices(Vec<String>),
}

impl AnswerValue {
    /// 空文本、空数组视为未作答
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(text) => text.trim().is_empty(),
            AnswerValue::Choices(choices) => choices.is_empty(),
            AnswerValue::Flag(_) | AnswerValue::Number(_) => false,
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Flag(value)
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(value: Vec<String>) -> Self {
        AnswerValue::Choices(value)
    }
}

/// 题目 ID → 答案
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(BTreeMap<String, AnswerValue>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖一题答案，返回旧值
    pub fn upsert(
        &mut self,
        question_id: impl Into<String>,
        value: impl Into<AnswerValue>,
    ) -> Option<AnswerValue> {
        self.0.insert(question_id.into(), value.into())
    }

    /// 用 `newer` 中的答案覆盖当前答案，已有的键不会丢失
    pub fn merge_from(&mut self, newer: &AnswerSet) {
        for (question_id, value) in &newer.0 {
            self.0.insert(question_id.clone(), value.clone());
        }
    }

    pub fn get(&self, question_id: &str) -> Option<&AnswerValue> {
        self.0.get(question_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnswerValue)> {
        self.0.iter()
    }

    /// 统计给定题目中未作答的数量
    pub fn unanswered_count<'a>(&self, question_ids: impl IntoIterator<Item = &'a str>) -> usize {
        question_ids
            .into_iter()
            .filter(|id| self.get(id).map_or(true, AnswerValue::is_blank))
            .count()
    }
}

impl<K: Into<String>, V: Into<AnswerValue>> FromIterator<(K, V)> for AnswerSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = AnswerSet::new();
        for (question_id, value) in iter {
            set.upsert(question_id, value);
        }
        set
    }
}
