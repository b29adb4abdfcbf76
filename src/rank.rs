//! Relevance ranking.
//!
//! Rankers assign per-item weights to single-term result sets before they
//! are combined; the logistic-regression algorithm instead scores the
//! combined document from its matched-term features (see
//! [`LrFeatures`]). All constants are overridable per index configuration
//! and per query.

use serde::{Deserialize, Serialize};

use crate::error::{CarrelError, Result};
use crate::postings::DocKey;
use crate::result::ResultSet;

/// Collection-level statistics a ranker needs. Implemented by the index
/// over its document-stats side store.
pub trait DocStats {
    /// Number of documents in the collection.
    fn total_docs(&self) -> u64;

    /// Mean document length in words.
    fn mean_doc_len(&self) -> f64;

    /// Length of one document in words, when known.
    fn doc_len(&self, key: &DocKey) -> Option<u64>;
}

/// The supported ranking algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankAlgorithm {
    /// Term frequency times inverse document frequency.
    TfIdf,
    /// CORI inference-network weighting (the default).
    #[default]
    Cori,
    /// Okapi BM-25.
    Okapi,
    /// Logistic regression over matched-term features.
    LogReg,
}

impl RankAlgorithm {
    /// Parse an `algorithm` modifier value.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "tfidf" => Ok(RankAlgorithm::TfIdf),
            "cori" => Ok(RankAlgorithm::Cori),
            "okapi" => Ok(RankAlgorithm::Okapi),
            "lr" => Ok(RankAlgorithm::LogReg),
            other => Err(CarrelError::query(format!(
                "unknown relevance algorithm '{other}'"
            ))),
        }
    }
}

/// How per-term weights fold into one document weight at combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightFold {
    /// Sum of matched-term weights.
    Sum,
    /// Sum divided by the number of operand sets (the default).
    #[default]
    Mean,
    /// Each weight rescaled by its set's min/max ratio, then the mean.
    Norm,
}

impl WeightFold {
    /// Parse a `combine` modifier value.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "sum" => Ok(WeightFold::Sum),
            "mean" => Ok(WeightFold::Mean),
            "norm" => Ok(WeightFold::Norm),
            other => Err(CarrelError::query(format!(
                "unknown weight combination '{other}'"
            ))),
        }
    }
}

/// CORI tuning constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoriParams {
    /// Added to the term frequency in the T denominator.
    pub k: f64,
    /// Length-normalization multiplier in the T denominator.
    pub b: f64,
    /// Weight floor.
    pub floor: f64,
    /// Range above the floor.
    pub range: f64,
}

impl Default for CoriParams {
    fn default() -> Self {
        CoriParams {
            k: 50.0,
            b: 150.0,
            floor: 0.4,
            range: 0.6,
        }
    }
}

/// Okapi BM-25 tuning constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OkapiParams {
    /// Length-normalization mix.
    pub b: f64,
    /// Term-frequency saturation.
    pub k1: f64,
    /// Query-term-frequency saturation.
    pub k3: f64,
}

impl Default for OkapiParams {
    fn default() -> Self {
        OkapiParams {
            b: 0.75,
            k1: 1.5,
            k3: 1.5,
        }
    }
}

/// Logistic-regression coefficients: the intercept plus one coefficient
/// per feature x1..x6.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRegParams {
    /// `[c0, c1, c2, c3, c4, c5, c6]`.
    pub constants: [f64; 7],
}

impl LogRegParams {
    /// Coefficients proposed by William S. Cooper.
    pub const COOPER: LogRegParams = LogRegParams {
        constants: [-3.7, 1.269, -0.31, 0.679, -0.0674, 0.223, 2.01],
    };

    /// Coefficients proposed by Ray R. Larson (the default).
    pub const LARSON: LogRegParams = LogRegParams {
        constants: [-3.7, 1.269, -0.31, 0.679, -0.021, 0.223, 4.01],
    };
}

impl Default for LogRegParams {
    fn default() -> Self {
        LogRegParams::LARSON
    }
}

/// All ranking constants, as configured on an index.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RankParams {
    /// CORI constants.
    pub cori: CoriParams,
    /// BM-25 constants.
    pub okapi: OkapiParams,
    /// Logistic-regression coefficients.
    pub logreg: LogRegParams,
}

/// A resolved ranking request: algorithm, fold policy and constants.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RankPlan {
    /// Algorithm to run.
    pub algorithm: RankAlgorithm,
    /// Fold policy at combination.
    pub fold: WeightFold,
    /// Constants in effect.
    pub params: RankParams,
}

/// Assign per-item weights to one single-term result set.
///
/// Not used for [`RankAlgorithm::LogReg`], which scores at combination
/// time instead.
pub fn assign_weights(
    algorithm: RankAlgorithm,
    params: &RankParams,
    set: &mut ResultSet,
    stats: &dyn DocStats,
) -> Result<()> {
    let total_docs = stats.total_docs() as f64;
    if total_docs == 0.0 {
        return Err(CarrelError::config(
            "cannot rank against an empty collection",
        ));
    }
    let matches = set.len() as f64;
    if matches == 0.0 {
        return Ok(());
    }
    set.idf = (total_docs / matches).ln();

    match algorithm {
        RankAlgorithm::TfIdf => {
            let idf = (total_docs / matches).ln();
            for i in 0..set.items.len() {
                let weight = f64::from(set.items[i].occurrences) * idf;
                set.items[i].weight = weight;
                set.track_weight(weight);
            }
        }
        RankAlgorithm::Cori => {
            let p = params.cori;
            let avg = positive_mean_len(stats)?;
            let i_part = ((total_docs + 0.5) / matches).ln() / (total_docs + 1.0).ln();
            for i in 0..set.items.len() {
                let tf = f64::from(set.items[i].occurrences);
                let size = doc_len_or_mean(stats, &set.items[i].key);
                let t_part = tf / (tf + p.k + (p.b * size) / avg);
                let weight = p.floor + p.range * t_part * i_part;
                set.items[i].weight = weight;
                set.track_weight(weight);
            }
        }
        RankAlgorithm::Okapi => {
            let p = params.okapi;
            let avg = positive_mean_len(stats)?;
            let idf = (total_docs / matches).ln();
            let qf = f64::from(set.query_freq.max(1));
            let qtw = ((p.k3 + 1.0) * qf) / (p.k3 + qf);
            for i in 0..set.items.len() {
                let tf = f64::from(set.items[i].occurrences);
                let size = doc_len_or_mean(stats, &set.items[i].key);
                let t_part = ((p.k1 + 1.0) * tf) / (p.k1 * ((1.0 - p.b) + p.b * size / avg) + tf);
                let weight = idf * t_part * qtw;
                set.items[i].weight = weight;
                set.track_weight(weight);
            }
        }
        RankAlgorithm::LogReg => {
            return Err(CarrelError::invalid_operation(
                "logistic regression scores documents at combination time",
            ));
        }
    }
    Ok(())
}

fn positive_mean_len(stats: &dyn DocStats) -> Result<f64> {
    let avg = stats.mean_doc_len();
    if avg <= 0.0 {
        return Err(CarrelError::config(
            "cannot rank without a mean document length",
        ));
    }
    Ok(avg)
}

fn doc_len_or_mean(stats: &dyn DocStats, key: &DocKey) -> f64 {
    stats
        .doc_len(key)
        .map(|l| l as f64)
        .unwrap_or_else(|| stats.mean_doc_len())
}

/// Per-document features for the logistic-regression score, aggregated
/// over the query terms matching the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrFeatures {
    /// x1: mean `ln(query frequency)` of the matched terms.
    pub mean_log_query_freq: f64,
    /// x2: square root of the summed query frequencies of all terms.
    pub root_sum_query_freq: f64,
    /// x3: mean `ln(term frequency in the document)`.
    pub mean_log_tf: f64,
    /// x4: square root of the document length.
    pub root_doc_len: f64,
    /// x5: mean inverse document frequency of the matched terms.
    pub mean_idf: f64,
    /// x6: `ln(number of matched terms)`.
    pub log_matched: f64,
}

/// The logistic-regression weight: `0.75 * sigmoid(c0 + Σ ci·xi)`.
pub fn logistic_weight(params: &LogRegParams, features: &LrFeatures) -> f64 {
    let c = params.constants;
    let logodds = c[0]
        + c[1] * features.mean_log_query_freq
        + c[2] * features.root_sum_query_freq
        + c[3] * features.mean_log_tf
        + c[4] * features.root_doc_len
        + c[5] * features.mean_idf
        + c[6] * features.log_matched;
    0.75 * (logodds.exp() / (1.0 + logodds.exp()))
}
