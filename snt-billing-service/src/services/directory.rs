//! Plot/resident registry as seen by the matcher.

use crate::models::Plot;
use once_cell::sync::Lazy;
use regex::Regex;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Words that introduce a plot number ("уч. 12", "№ 12", "plot 12").
pub const PLOT_MARKERS: &[&str] = &[
    "уч", "участок", "участка", "№", "n", "no", "nr", "plot", "lot", "д", "дом",
];

/// Words that carry no street identity.
pub const STREET_MARKERS: &[&str] = &[
    "ул", "улица", "улицы", "пер", "переулок", "пр", "проезд", "street", "st", "снт",
];

static NUMBER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+[a-zа-я]?$").expect("plot number pattern is valid")
});

/// Lowercased alphanumeric tokens; `ё` folds to `е` and `№` stands alone.
pub fn label_tokens(text: &str) -> Vec<String> {
    let folded = text.to_lowercase().replace('ё', "е").replace('№', " № ");
    folded
        .split(|c: char| !(c.is_alphanumeric() || c == '№'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

pub fn is_marker(token: &str) -> bool {
    PLOT_MARKERS.contains(&token) || STREET_MARKERS.contains(&token)
}

pub fn is_plot_number(token: &str) -> bool {
    NUMBER_TOKEN.is_match(token)
}

/// "012" and "12" name the same plot.
pub fn normalize_number(number: &str) -> String {
    let lowered = number.trim().to_lowercase();
    let trimmed = lowered.trim_start_matches('0');
    if trimmed.is_empty() || !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        lowered
    } else {
        trimmed.to_string()
    }
}

/// Canonical lookup key: street words and number without marker words.
pub fn label_key(text: &str) -> String {
    label_tokens(text)
        .into_iter()
        .filter(|t| !is_marker(t))
        .map(|t| {
            if is_plot_number(&t) {
                normalize_number(&t)
            } else {
                t
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// In-memory plot registry with label and account-number indexes.
#[derive(Debug, Default, Clone)]
pub struct PlotDirectory {
    plots: BTreeMap<Uuid, Plot>,
    by_key: HashMap<String, Uuid>,
    by_account: HashMap<String, Uuid>,
}

impl PlotDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plot. Two plots may not share a label or account number.
    pub fn insert(&mut self, plot: Plot) -> Result<(), AppError> {
        let key = plot_key(&plot);
        if key.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Plot number is required"
            )));
        }
        if self.by_key.contains_key(&key) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Plot '{}' is already registered",
                plot.label()
            )));
        }
        let account = plot
            .account_number
            .as_deref()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty());
        if let Some(ref account) = account {
            if self.by_account.contains_key(account) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Account number '{}' is already registered",
                    account
                )));
            }
            self.by_account.insert(account.clone(), plot.plot_id);
        }

        self.by_key.insert(key, plot.plot_id);
        self.plots.insert(plot.plot_id, plot);
        Ok(())
    }

    pub fn get(&self, plot_id: &Uuid) -> Option<&Plot> {
        self.plots.get(plot_id)
    }

    pub fn contains(&self, plot_id: &Uuid) -> bool {
        self.plots.contains_key(plot_id)
    }

    pub fn plots(&self) -> impl Iterator<Item = &Plot> {
        self.plots.values()
    }

    pub fn len(&self) -> usize {
        self.plots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    /// Exact lookup by free-form label ("ул. Лесная, уч. 12").
    pub fn find_by_label(&self, label: &str) -> Option<&Plot> {
        self.by_key
            .get(&label_key(label))
            .and_then(|id| self.plots.get(id))
    }

    pub fn find_by_account(&self, account: &str) -> Option<&Plot> {
        self.by_account
            .get(&account.trim().to_lowercase())
            .and_then(|id| self.plots.get(id))
    }

    /// Display label for reports; unknown ids render as the id itself.
    pub fn label_of(&self, plot_id: &Uuid) -> String {
        self.plots
            .get(plot_id)
            .map(|p| p.label())
            .unwrap_or_else(|| plot_id.to_string())
    }
}

fn plot_key(plot: &Plot) -> String {
    label_key(&format!("{} {}", plot.street, plot.number))
}
