use regex::Regex;
use tracing::warn;

use crate::domain::AttrMap;

#[derive(Debug, Clone)]
pub struct Sample {
    id: String,
    subject: Option<String>,
    replicate: Option<String>,
    attributes: AttrMap,
    populated: bool,
    title_pattern: Regex,
}

impl Sample {
    pub fn new(id: impl Into<String>, title_pattern: Regex) -> Self {
        Self {
            id: id.into(),
            subject: None,
            replicate: None,
            attributes: AttrMap::new(),
            populated: false,
            title_pattern,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn subject_key(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.id)
    }

    pub fn replicate(&self) -> Option<&str> {
        self.replicate.as_deref()
    }

    pub fn attributes(&self) -> &AttrMap {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(|values| values.first())
            .map(|value| value.as_str())
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub(crate) fn mark_populated(&mut self) {
        self.populated = true;
    }

    pub fn add_pair(&mut self, key: &str, value: &str) {
        self.attributes
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        if key != "title" {
            return;
        }
        match self.title_pattern.captures(value) {
            Some(caps) => {
                self.subject = caps.get(1).map(|m| m.as_str().to_string());
                self.replicate = caps
                    .get(2)
                    .map(|m| m.as_str().to_string())
                    .filter(|rep| !rep.is_empty());
            }
            None => warn!(
                "Title '{value}' of {} did not match pattern {}.",
                self.id,
                self.title_pattern.as_str()
            ),
        }
    }

    pub fn split_derivatives(&mut self) {
        let repeated = self
            .attributes
            .iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in repeated {
            let Some(values) = self.attributes.remove(&key) else {
                continue;
            };
            let mut kept: Vec<String> = Vec::new();
            for value in values {
                let parts = value.split(':').map(str::trim).collect::<Vec<_>>();
                if let [name, derived] = parts.as_slice() {
                    let slot = self.attributes.entry(format!("{key}:{name}")).or_default();
                    if !slot.iter().any(|existing| existing == derived) {
                        slot.push(derived.to_string());
                    }
                } else if !kept.contains(&value) {
                    kept.push(value);
                }
            }
            if !kept.is_empty() {
                self.attributes.insert(key, kept);
            }
        }
    }
}
