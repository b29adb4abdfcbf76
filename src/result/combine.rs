//! Result-set combination: k-way merge-join plus positional reduction.
//!
//! All operand sets are ordered by doc key, so boolean and positional
//! combination walk them in lockstep rather than hashing. Proximity
//! reduction is pairwise left to right; with three or more operands and the
//! ordered flag off it does not explore orderings across pairs, matching
//! the long-standing behavior of this algebra.

use bit_vec::BitVec;

use crate::error::{CarrelError, Result};
use crate::postings::DocKey;
use crate::query::{BooleanOp, BooleanValue, DistanceCmp, ProxUnit, Relation, RelationValue};
use crate::rank::{
    self, DocStats, LrFeatures, RankAlgorithm, RankParams, RankPlan, WeightFold,
};
use crate::result::{ProxGroup, ProxHit, ResultItem, ResultSet, SetRef};
use crate::util::CancelToken;

const CANCEL_STRIDE: usize = 1024;

/// The combination operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOp {
    /// Intersection.
    And,
    /// Union.
    Or,
    /// Left minus right (exactly two operands).
    Not,
    /// Positional adjacency / proximity.
    Adjacent,
    /// All terms mutually within the distance.
    Window,
}

/// A fully resolved combination request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombineSpec {
    /// Operator.
    pub op: CombineOp,
    /// Proximity distance.
    pub distance: u32,
    /// Accepted comparison against the distance.
    pub comparison: DistanceCmp,
    /// Unit the distance is measured in.
    pub unit: ProxUnit,
    /// Whether terms must appear in operand order.
    pub ordered: bool,
    /// Whether combined items keep merged position info.
    pub keep_prox: bool,
    /// Relevance ranking to apply, if any.
    pub relevance: Option<RankPlan>,
}

impl CombineSpec {
    fn base(op: CombineOp) -> Self {
        CombineSpec {
            op,
            distance: 1,
            comparison: DistanceCmp::Equal,
            unit: ProxUnit::Word,
            ordered: false,
            keep_prox: false,
            relevance: None,
        }
    }

    /// Resolve a relation (for multi-term clauses) into a spec.
    pub fn from_relation(relation: &Relation, params: &RankParams) -> Result<Self> {
        let op = match relation.value {
            RelationValue::Exact | RelationValue::All => CombineOp::And,
            RelationValue::Any => CombineOp::Or,
            RelationValue::Phrase => CombineOp::Adjacent,
            RelationValue::Window => CombineOp::Window,
            other => {
                return Err(CarrelError::query(format!(
                    "relation '{}' does not combine result sets",
                    other.as_str()
                )));
            }
        };
        let mut spec = CombineSpec::base(op);
        // Adjacency and phrase are ordered by definition.
        spec.ordered = matches!(op, CombineOp::Adjacent);
        Self::apply_modifiers(
            &mut spec,
            relation.modifiers.iter().map(|m| (m.name.as_str(), m)),
            params,
        )?;
        spec.validate()?;
        Ok(spec)
    }

    /// Resolve a boolean connective into a spec.
    pub fn from_boolean(op: &BooleanOp, params: &RankParams) -> Result<Self> {
        let mut spec = match op.value {
            BooleanValue::And => CombineSpec::base(CombineOp::And),
            BooleanValue::Or => CombineSpec::base(CombineOp::Or),
            BooleanValue::Not => CombineSpec::base(CombineOp::Not),
            BooleanValue::Prox => CombineSpec::base(CombineOp::Adjacent),
        };
        Self::apply_modifiers(
            &mut spec,
            op.modifiers.iter().map(|m| (m.name.as_str(), m)),
            params,
        )?;
        spec.validate()?;
        Ok(spec)
    }

    fn apply_modifiers<'a>(
        spec: &mut CombineSpec,
        modifiers: impl Iterator<Item = (&'a str, &'a crate::query::Modifier)>,
        params: &RankParams,
    ) -> Result<()> {
        let mut relevant = false;
        let mut algorithm = RankAlgorithm::default();
        let mut fold = WeightFold::default();
        for (name, modifier) in modifiers {
            match name {
                "distance" => {
                    spec.distance = modifier.value.parse().map_err(|_| {
                        CarrelError::query(format!("bad distance value '{}'", modifier.value))
                    })?;
                    spec.comparison = DistanceCmp::parse(&modifier.comparison)?;
                }
                "unit" => spec.unit = ProxUnit::parse(&modifier.value)?,
                "ordered" => spec.ordered = true,
                "unordered" => spec.ordered = false,
                "proxinfo" => spec.keep_prox = true,
                "relevant" => relevant = true,
                "algorithm" => {
                    relevant = true;
                    algorithm = RankAlgorithm::parse(&modifier.value)?;
                }
                "combine" => {
                    relevant = true;
                    fold = WeightFold::parse(&modifier.value)?;
                }
                _ => {}
            }
        }
        if relevant {
            spec.relevance = Some(RankPlan {
                algorithm,
                fold,
                params: *params,
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if matches!(self.op, CombineOp::Adjacent | CombineOp::Window)
            && self.unit == ProxUnit::Element
            && !(self.distance == 0 && self.comparison == DistanceCmp::Equal)
        {
            return Err(CarrelError::query(
                "proximity in element units supports only distance 0",
            ));
        }
        Ok(())
    }

    fn is_positional(&self) -> bool {
        matches!(self.op, CombineOp::Adjacent | CombineOp::Window)
    }
}

/// Combine operand sets into one result set.
///
/// Operands must be in query order for positional operators. `stats` is
/// required when the spec (or an already-ranked operand) asks for
/// relevance.
pub fn combine(
    mut operands: Vec<ResultSet>,
    spec: &CombineSpec,
    stats: Option<&dyn DocStats>,
    cancel: &CancelToken,
) -> Result<ResultSet> {
    let out_id = SetRef(operands.iter().map(|o| o.id.0).max().unwrap_or(0) + 1);

    if operands.is_empty() {
        return Ok(ResultSet::empty(out_id));
    }
    if spec.op == CombineOp::Not && operands.len() != 2 {
        return Err(CarrelError::invalid_operation(
            "NOT takes exactly two operands",
        ));
    }

    // Operands already carrying weights keep relevance alive through
    // further combination.
    let mut plan = spec.relevance;
    if plan.is_none() && operands.iter().any(|o| o.relevancy) {
        plan = Some(RankPlan::default());
    }

    if let Some(plan) = &plan
        && plan.algorithm != RankAlgorithm::LogReg
    {
        let stats = require_stats(stats)?;
        for operand in &mut operands {
            if !operand.relevancy {
                rank::assign_weights(plan.algorithm, &plan.params, operand, stats)?;
            }
            if plan.fold == WeightFold::Norm {
                // Norm folds scaled contributions, which need the range.
                operand.scale_weights();
            }
        }
    }

    // Logistic-regression weights are computed inside the join loop, so a
    // plan using it cannot take the escapes that return operands unscored.
    let lr_plan = matches!(&plan, Some(p) if p.algorithm == RankAlgorithm::LogReg);

    // Fast escapes on empty operands.
    let all_required = matches!(
        spec.op,
        CombineOp::And | CombineOp::Adjacent | CombineOp::Window
    );
    if all_required && operands.iter().any(|o| o.is_empty()) {
        return Ok(ResultSet::empty(out_id));
    }
    match spec.op {
        CombineOp::Not if !lr_plan => {
            if operands[0].is_empty() || operands[1].is_empty() {
                let mut left = operands.swap_remove(0);
                left.id = out_id;
                return Ok(left);
            }
        }
        CombineOp::Or if operands.len() == 2 && !lr_plan => {
            if operands.iter().any(|o| o.is_empty()) {
                let keep = usize::from(operands[0].is_empty());
                let mut kept = operands.swap_remove(keep);
                kept.id = out_id;
                return Ok(kept);
            }
        }
        _ => {}
    }
    if operands.len() == 1 && !lr_plan {
        let Some(mut only) = operands.pop() else {
            return Ok(ResultSet::empty(out_id));
        };
        only.id = out_id;
        if plan.is_some() {
            only.relevancy = true;
        }
        return Ok(only);
    }

    if let Some(set) = bitmap_fast_path(&operands, spec, &plan, out_id)? {
        return Ok(set);
    }

    // Short operands first for intersections, long first for unions.
    match spec.op {
        CombineOp::And => operands.sort_by_key(|o| o.len()),
        CombineOp::Or => operands.sort_by_key(|o| std::cmp::Reverse(o.len())),
        _ => {}
    }

    let lr_context = match &plan {
        Some(plan) if plan.algorithm == RankAlgorithm::LogReg => {
            Some(LrContext::prepare(&mut operands, require_stats(stats)?)?)
        }
        _ => None,
    };

    let k = operands.len();
    let mut cursor = vec![0usize; k];
    let mut out = ResultSet::empty(out_id);
    out.query_term = operands
        .iter()
        .map(|o| o.query_term.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mut steps = 0usize;

    loop {
        steps += 1;
        if steps % CANCEL_STRIDE == 0 {
            cancel.check("result-set combination")?;
        }

        let mut key: Option<DocKey> = None;
        for (i, operand) in operands.iter().enumerate() {
            if let Some(item) = operand.items.get(cursor[i]) {
                key = Some(match key {
                    None => item.key,
                    Some(current) => current.min(item.key),
                });
            }
        }
        let Some(key) = key else { break };

        let mut matched: Vec<usize> = Vec::with_capacity(k);
        for (i, operand) in operands.iter().enumerate() {
            if operand.items.get(cursor[i]).map(|item| item.key) == Some(key) {
                matched.push(i);
            }
        }

        let emit = match spec.op {
            CombineOp::Or => true,
            CombineOp::And | CombineOp::Adjacent | CombineOp::Window => matched.len() == k,
            CombineOp::Not => matched == [0],
        };

        if emit {
            let matched_items: Vec<&ResultItem> = matched
                .iter()
                .map(|&i| &operands[i].items[cursor[i]])
                .collect();

            let survivors = if spec.is_positional() {
                reduce_positions(&matched_items, spec)?
            } else {
                Some(Vec::new())
            };

            if let Some(groups) = survivors {
                let mut item = matched_items[0].clone();
                item.set = out_id;

                if spec.is_positional() {
                    item.prox = groups;
                } else if spec.keep_prox {
                    item.prox = matched_items
                        .iter()
                        .flat_map(|m| m.prox.iter().cloned())
                        .collect();
                }

                if let Some(plan) = &plan {
                    let weight = match &lr_context {
                        Some(context) => context.weight(
                            plan,
                            &key,
                            &matched,
                            &matched_items,
                            &operands,
                        ),
                        None => fold_weights(plan.fold, &matched_items, &operands, &matched, k),
                    };
                    item.weight = weight;
                    out.track_weight(weight);
                }

                out.items.push(item);
            }
        }

        for &i in &matched {
            cursor[i] += 1;
        }
    }

    out.total_docs = out.items.len() as u64;
    out.total_occs = out.items.iter().map(|i| u64::from(i.occurrences)).sum();
    if plan.is_some() {
        out.relevancy = true;
    }
    Ok(out)
}

fn require_stats<'a>(stats: Option<&'a dyn DocStats>) -> Result<&'a dyn DocStats> {
    stats.ok_or_else(|| {
        CarrelError::config("relevance ranking requires collection statistics")
    })
}

fn fold_weights(
    fold: WeightFold,
    matched_items: &[&ResultItem],
    operands: &[ResultSet],
    matched: &[usize],
    operand_count: usize,
) -> f64 {
    match fold {
        WeightFold::Sum => matched_items.iter().map(|i| i.weight).sum(),
        WeightFold::Mean => {
            matched_items.iter().map(|i| i.weight).sum::<f64>() / operand_count as f64
        }
        WeightFold::Norm => {
            let mut sum = 0.0;
            for (item, &set_idx) in matched_items.iter().zip(matched) {
                let set = &operands[set_idx];
                let ratio = if set.max_weight != 0.0 {
                    set.min_weight / set.max_weight
                } else {
                    1.0
                };
                sum += item.weight * ratio;
            }
            sum / operand_count as f64
        }
    }
}

/// Pre-join state for logistic-regression scoring.
struct LrContext<'a> {
    root_sum_query_freq: f64,
    stats: &'a dyn DocStats,
}

impl<'a> LrContext<'a> {
    fn prepare(operands: &mut [ResultSet], stats: &'a dyn DocStats) -> Result<Self> {
        let total_docs = stats.total_docs() as f64;
        if total_docs == 0.0 {
            return Err(CarrelError::config(
                "cannot rank against an empty collection",
            ));
        }
        let mut sum_query_freq = 0u64;
        for operand in operands.iter_mut() {
            sum_query_freq += u64::from(operand.query_freq.max(1));
            if !operand.is_empty() {
                operand.idf = (total_docs / operand.len() as f64).ln();
            }
        }
        Ok(LrContext {
            root_sum_query_freq: (sum_query_freq as f64).sqrt(),
            stats,
        })
    }

    fn weight(
        &self,
        plan: &RankPlan,
        key: &DocKey,
        matched: &[usize],
        matched_items: &[&ResultItem],
        operands: &[ResultSet],
    ) -> f64 {
        let n = matched.len() as f64;
        let mean_log_query_freq = matched
            .iter()
            .map(|&i| f64::from(operands[i].query_freq.max(1)).ln())
            .sum::<f64>()
            / n;
        let mean_log_tf = matched_items
            .iter()
            .map(|item| f64::from(item.occurrences.max(1)).ln())
            .sum::<f64>()
            / n;
        let mean_idf = matched.iter().map(|&i| operands[i].idf).sum::<f64>() / n;
        let doc_len = self
            .stats
            .doc_len(key)
            .map(|l| l as f64)
            .unwrap_or_else(|| self.stats.mean_doc_len());
        let features = LrFeatures {
            mean_log_query_freq,
            root_sum_query_freq: self.root_sum_query_freq,
            mean_log_tf,
            root_doc_len: doc_len.max(0.0).sqrt(),
            mean_idf,
            log_matched: n.ln(),
        };
        rank::logistic_weight(&plan.params.logreg, &features)
    }
}

fn bitmap_fast_path(
    operands: &[ResultSet],
    spec: &CombineSpec,
    plan: &Option<RankPlan>,
    out_id: SetRef,
) -> Result<Option<ResultSet>> {
    if plan.is_some()
        || !matches!(spec.op, CombineOp::And | CombineOp::Or | CombineOp::Not)
        || operands.iter().any(|o| o.bitmap.is_none())
    {
        return Ok(None);
    }

    let (store_id, first_bits) = operands[0]
        .bitmap
        .as_ref()
        .ok_or_else(|| CarrelError::invalid_operation("bitmap operand lost its bits"))?;
    let max_len = operands
        .iter()
        .filter_map(|o| o.bitmap.as_ref().map(|(_, b)| b.len()))
        .max()
        .unwrap_or(0);

    let mut acc = first_bits.clone();
    acc.grow(max_len - acc.len(), false);
    for operand in &operands[1..] {
        let (other_store, bits) = operand
            .bitmap
            .as_ref()
            .ok_or_else(|| CarrelError::invalid_operation("bitmap operand lost its bits"))?;
        if other_store != store_id {
            // Mixed stores fall back to the merge-join.
            return Ok(None);
        }
        let mut bits = bits.clone();
        bits.grow(max_len - bits.len(), false);
        match spec.op {
            CombineOp::And => acc.and(&bits),
            CombineOp::Or => acc.or(&bits),
            CombineOp::Not => acc.difference(&bits),
            _ => unreachable!(),
        };
    }

    let mut out = ResultSet::empty(out_id);
    out.items = acc
        .iter()
        .enumerate()
        .filter(|(_, set)| *set)
        .map(|(doc, _)| {
            let mut item = ResultItem::new(DocKey::new(doc as u64, *store_id), 1);
            item.set = out_id;
            item
        })
        .collect();
    out.total_docs = out.items.len() as u64;
    out.total_occs = out.total_docs;
    out.bitmap = Some((*store_id, trim_bits(acc)));
    Ok(Some(out))
}

fn trim_bits(mut bits: BitVec) -> BitVec {
    let last_set = bits.iter().rposition(|b| b);
    bits.truncate(last_set.map(|i| i + 1).unwrap_or(0));
    bits
}

/// Reduce matched items' position groups pairwise, left to right. Returns
/// the surviving groups or `None` when the document fails the positional
/// test.
fn reduce_positions(
    matched_items: &[&ResultItem],
    spec: &CombineSpec,
) -> Result<Option<Vec<ProxGroup>>> {
    let mut groups: Vec<ProxGroup> = matched_items[0].prox.clone();
    if groups.is_empty() {
        return Err(CarrelError::query(
            "positional combination requires a proximity index",
        ));
    }

    for item in &matched_items[1..] {
        let mut survivors: Vec<ProxGroup> = Vec::new();
        for rgroup in &item.prox {
            let Some(rhit) = rgroup.last() else { continue };
            for lgroup in &groups {
                let Some(lhit) = lgroup.last() else { continue };
                if !hit_matches(lhit, rhit, spec)? {
                    continue;
                }
                if spec.op == CombineOp::Window
                    && lgroup.len() > 1
                    && !window_holds(lgroup, rhit, spec)?
                {
                    continue;
                }
                let mut extended = lgroup.clone();
                if extended.last() != Some(rhit) {
                    extended.push(*rhit);
                }
                survivors.push(extended);
            }
        }
        if survivors.is_empty() {
            return Ok(None);
        }
        groups = survivors;
    }
    Ok(Some(groups))
}

fn hit_matches(left: &ProxHit, right: &ProxHit, spec: &CombineSpec) -> Result<bool> {
    match spec.unit {
        ProxUnit::Element => Ok(left.position.element == right.position.element),
        ProxUnit::Word | ProxUnit::Character => {
            if left.position.element != right.position.element {
                return Ok(false);
            }
            let d = signed_distance(left, right, spec)?;
            if spec.ordered && d < 0 {
                return Ok(false);
            }
            Ok(spec.comparison.accepts(d.unsigned_abs() as u32, spec.distance))
        }
    }
}

fn window_holds(group: &ProxGroup, right: &ProxHit, spec: &CombineSpec) -> Result<bool> {
    for member in group {
        if member.position.element != right.position.element {
            return Ok(false);
        }
        let d = signed_distance(member, right, spec)?;
        if spec.ordered && d < 0 {
            return Ok(false);
        }
        if !spec.comparison.accepts(d.unsigned_abs() as u32, spec.distance) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn signed_distance(left: &ProxHit, right: &ProxHit, spec: &CombineSpec) -> Result<i64> {
    if spec.unit == ProxUnit::Character {
        match (left.position.char_offset, right.position.char_offset) {
            (Some(l), Some(r)) => Ok(i64::from(r) - i64::from(l)),
            _ => Err(CarrelError::query(
                "cannot do character proximity without offset information",
            )),
        }
    } else {
        Ok(i64::from(right.position.word) - i64::from(left.position.word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::{PostingEntry, PostingsRecord, Position};

    struct FixedStats {
        total: u64,
        mean: f64,
    }

    impl DocStats for FixedStats {
        fn total_docs(&self) -> u64 {
            self.total
        }
        fn mean_doc_len(&self) -> f64 {
            self.mean
        }
        fn doc_len(&self, _key: &DocKey) -> Option<u64> {
            None
        }
    }

    fn set_from(term_id: u64, entries: Vec<PostingEntry>, term: &str) -> ResultSet {
        ResultSet::from_record(
            SetRef(term_id as u32),
            &PostingsRecord::from_entries(term_id, entries),
            term,
        )
    }

    fn plain(doc: u64, occ: u32) -> PostingEntry {
        PostingEntry::new(DocKey::new(doc, 0), occ)
    }

    fn at(doc: u64, words: &[u32]) -> PostingEntry {
        PostingEntry::with_positions(
            DocKey::new(doc, 0),
            words.iter().map(|w| Position::new(0, *w)).collect(),
        )
    }

    fn doc_ids(set: &ResultSet) -> Vec<u64> {
        set.items.iter().map(|i| i.key.doc_id).collect()
    }

    fn and_spec() -> CombineSpec {
        CombineSpec::from_relation(
            &Relation::new(RelationValue::All),
            &RankParams::default(),
        )
        .unwrap()
    }

    fn or_spec() -> CombineSpec {
        CombineSpec::from_relation(
            &Relation::new(RelationValue::Any),
            &RankParams::default(),
        )
        .unwrap()
    }

    fn adj_spec() -> CombineSpec {
        CombineSpec::from_relation(
            &Relation::new(RelationValue::Phrase),
            &RankParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_and_intersects() {
        let a = set_from(1, vec![plain(1, 1), plain(3, 1), plain(7, 1)], "fox");
        let b = set_from(2, vec![plain(3, 2), plain(5, 1), plain(7, 1)], "dog");
        let out = combine(vec![a, b], &and_spec(), None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![3, 7]);
    }

    #[test]
    fn test_or_unions_sorted() {
        let a = set_from(1, vec![plain(1, 1), plain(7, 1)], "fox");
        let b = set_from(2, vec![plain(3, 2), plain(7, 1)], "dog");
        let out = combine(vec![a, b], &or_spec(), None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1, 3, 7]);
    }

    #[test]
    fn test_not_subtracts() {
        let a = set_from(1, vec![plain(1, 1), plain(3, 1), plain(7, 1)], "fox");
        let b = set_from(2, vec![plain(3, 2)], "dog");
        let spec = CombineSpec::from_boolean(
            &BooleanOp::new(BooleanValue::Not),
            &RankParams::default(),
        )
        .unwrap();
        let out = combine(vec![a, b], &spec, None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1, 7]);
    }

    #[test]
    fn test_and_with_empty_is_empty() {
        let a = set_from(1, vec![plain(1, 1)], "fox");
        let b = ResultSet::empty(SetRef(2));
        let out = combine(vec![a, b], &and_spec(), None, &CancelToken::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_or_with_empty_is_identity() {
        let a = set_from(1, vec![plain(1, 1), plain(4, 1)], "fox");
        let b = ResultSet::empty(SetRef(2));
        let out = combine(vec![a, b], &or_spec(), None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1, 4]);
    }

    #[test]
    fn test_adjacency_requires_order_and_distance() {
        // doc 1: fox at 2, jumps at 3 (adjacent, in order)
        // doc 2: jumps at 2, fox at 3 (adjacent, wrong order)
        // doc 3: fox at 2, jumps at 9 (too far)
        let fox = set_from(1, vec![at(1, &[2]), at(2, &[3]), at(3, &[2])], "fox");
        let jumps = set_from(2, vec![at(1, &[3]), at(2, &[2]), at(3, &[9])], "jumps");
        let out = combine(vec![fox, jumps], &adj_spec(), None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1]);
        assert_eq!(out.items[0].prox.len(), 1);
        let group = &out.items[0].prox[0];
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].position.word, 2);
        assert_eq!(group[1].position.word, 3);
    }

    #[test]
    fn test_proximity_unordered_symmetric() {
        let fox = set_from(1, vec![at(1, &[5])], "fox");
        let dog = set_from(2, vec![at(1, &[3])], "dog");
        let spec = CombineSpec::from_boolean(
            &BooleanOp::new(BooleanValue::Prox)
                .with_modifier(crate::query::Modifier::compared("distance", "<=", "2")),
            &RankParams::default(),
        )
        .unwrap();
        assert!(!spec.ordered);

        let forward = combine(
            vec![fox.clone(), dog.clone()],
            &spec,
            None,
            &CancelToken::new(),
        )
        .unwrap();
        let backward = combine(vec![dog, fox], &spec, None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&forward), vec![1]);
        assert_eq!(doc_ids(&backward), vec![1]);
    }

    #[test]
    fn test_window_requires_all_members() {
        // fox 1, quick 2, dog 12: fox/quick within 4, dog outside.
        let fox = set_from(1, vec![at(1, &[1])], "fox");
        let quick = set_from(2, vec![at(1, &[2])], "quick");
        let dog = set_from(3, vec![at(1, &[12])], "dog");
        let spec = CombineSpec::from_relation(
            &Relation::new(RelationValue::Window)
                .with_modifier(crate::query::Modifier::compared("distance", "<=", "4")),
            &RankParams::default(),
        )
        .unwrap();
        let out = combine(
            vec![fox.clone(), quick.clone(), dog],
            &spec,
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(out.is_empty());

        let near = set_from(3, vec![at(1, &[4])], "dog");
        let out = combine(vec![fox, quick, near], &spec, None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1]);
    }

    #[test]
    fn test_character_proximity_needs_offsets() {
        let fox = set_from(1, vec![at(1, &[1])], "fox");
        let dog = set_from(2, vec![at(1, &[2])], "dog");
        let spec = CombineSpec::from_boolean(
            &BooleanOp::new(BooleanValue::Prox)
                .with_modifier(crate::query::Modifier::valued("unit", "character"))
                .with_modifier(crate::query::Modifier::compared("distance", "<=", "20")),
            &RankParams::default(),
        )
        .unwrap();
        assert!(combine(vec![fox, dog], &spec, None, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_element_unit_distance_zero() {
        let a = ResultSet::from_record(
            SetRef(1),
            &PostingsRecord::from_entries(
                1,
                vec![PostingEntry::with_positions(
                    DocKey::new(1, 0),
                    vec![Position::new(2, 0)],
                )],
            ),
            "a",
        );
        let b = ResultSet::from_record(
            SetRef(2),
            &PostingsRecord::from_entries(
                2,
                vec![PostingEntry::with_positions(
                    DocKey::new(1, 0),
                    vec![Position::new(2, 9)],
                )],
            ),
            "b",
        );
        let spec = CombineSpec::from_boolean(
            &BooleanOp::new(BooleanValue::Prox)
                .with_modifier(crate::query::Modifier::valued("unit", "element"))
                .with_modifier(crate::query::Modifier::valued("distance", "0")),
            &RankParams::default(),
        )
        .unwrap();
        let out = combine(vec![a, b], &spec, None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1]);
    }

    #[test]
    fn test_monotonicity() {
        let a = set_from(1, vec![plain(1, 1), plain(2, 1), plain(5, 1)], "a");
        let b = set_from(2, vec![plain(2, 1), plain(5, 1), plain(9, 1)], "b");

        let anded = combine(
            vec![a.clone(), b.clone()],
            &and_spec(),
            None,
            &CancelToken::new(),
        )
        .unwrap();
        let ored = combine(vec![a.clone(), b.clone()], &or_spec(), None, &CancelToken::new())
            .unwrap();

        assert!(anded.len() <= a.len().min(b.len()));
        assert!(ored.len() >= a.len().max(b.len()));
        assert!(ored.len() <= a.len() + b.len());

        let and_ids = doc_ids(&anded);
        let or_ids = doc_ids(&ored);
        for id in &and_ids {
            assert!(or_ids.contains(id));
        }
    }

    #[test]
    fn test_relevance_fold_sum_and_mean() {
        let stats = FixedStats {
            total: 10,
            mean: 10.0,
        };
        let a = set_from(1, vec![plain(1, 2), plain(2, 1)], "a");
        let b = set_from(2, vec![plain(1, 1)], "b");

        let mut spec = or_spec();
        spec.relevance = Some(RankPlan {
            algorithm: RankAlgorithm::TfIdf,
            fold: WeightFold::Sum,
            params: RankParams::default(),
        });
        let out = combine(
            vec![a.clone(), b.clone()],
            &spec,
            Some(&stats),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(out.relevancy);

        let idf_a = (10.0f64 / 2.0).ln();
        let idf_b = (10.0f64 / 1.0).ln();
        let doc1 = out.items.iter().find(|i| i.key.doc_id == 1).unwrap();
        assert!((doc1.weight - (2.0 * idf_a + idf_b)).abs() < 1e-9);
        assert!((out.max_weight - doc1.weight).abs() < 1e-12);

        spec.relevance = Some(RankPlan {
            algorithm: RankAlgorithm::TfIdf,
            fold: WeightFold::Mean,
            params: RankParams::default(),
        });
        let out = combine(vec![a, b], &spec, Some(&stats), &CancelToken::new()).unwrap();
        let doc1 = out.items.iter().find(|i| i.key.doc_id == 1).unwrap();
        assert!((doc1.weight - (2.0 * idf_a + idf_b) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_logistic_regression_bounds() {
        let stats = FixedStats {
            total: 50,
            mean: 80.0,
        };
        let a = set_from(1, vec![plain(1, 2), plain(2, 1)], "a");
        let b = set_from(2, vec![plain(1, 1), plain(3, 4)], "b");
        let mut spec = or_spec();
        spec.relevance = Some(RankPlan {
            algorithm: RankAlgorithm::LogReg,
            fold: WeightFold::Mean,
            params: RankParams::default(),
        });
        let out = combine(vec![a, b], &spec, Some(&stats), &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1, 2, 3]);
        for item in &out.items {
            assert!(item.weight > 0.0 && item.weight < 0.75, "{}", item.weight);
        }
    }

    #[test]
    fn test_logistic_regression_scores_despite_empty_operand() {
        // An empty operand must not short-circuit OR or NOT past the join
        // loop, where logistic-regression weights are computed.
        let stats = FixedStats {
            total: 50,
            mean: 80.0,
        };
        let mut spec = or_spec();
        spec.relevance = Some(RankPlan {
            algorithm: RankAlgorithm::LogReg,
            fold: WeightFold::Mean,
            params: RankParams::default(),
        });
        let a = set_from(1, vec![plain(1, 2), plain(2, 1)], "a");
        let out = combine(
            vec![a.clone(), ResultSet::empty(SetRef(2))],
            &spec,
            Some(&stats),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(out.relevancy);
        assert_eq!(doc_ids(&out), vec![1, 2]);
        for item in &out.items {
            assert!(item.weight > 0.0 && item.weight < 0.75, "{}", item.weight);
        }

        let not_spec = CombineSpec::from_boolean(
            &BooleanOp::new(BooleanValue::Not)
                .with_modifier(crate::query::Modifier::valued("algorithm", "lr")),
            &RankParams::default(),
        )
        .unwrap();
        let out = combine(
            vec![a, ResultSet::empty(SetRef(2))],
            &not_spec,
            Some(&stats),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(out.relevancy);
        assert_eq!(doc_ids(&out), vec![1, 2]);
        for item in &out.items {
            assert!(item.weight > 0.0 && item.weight < 0.75, "{}", item.weight);
        }
    }

    #[test]
    fn test_relevance_requires_stats() {
        let a = set_from(1, vec![plain(1, 1)], "a");
        let b = set_from(2, vec![plain(1, 1)], "b");
        let mut spec = and_spec();
        spec.relevance = Some(RankPlan::default());
        assert!(combine(vec![a, b], &spec, None, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_cancellation_stops_join() {
        let a = set_from(
            1,
            (0..5000).map(|d| plain(d, 1)).collect::<Vec<_>>(),
            "a",
        );
        let b = set_from(
            2,
            (0..5000).map(|d| plain(d, 1)).collect::<Vec<_>>(),
            "b",
        );
        let token = CancelToken::new();
        token.cancel();
        match combine(vec![a, b], &and_spec(), None, &token) {
            Err(CarrelError::Cancelled(_)) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_bitmap_fast_path() {
        use bit_vec::BitVec;

        let mut a = set_from(1, vec![plain(1, 1), plain(3, 1)], "a");
        let mut bits_a = BitVec::from_elem(4, false);
        bits_a.set(1, true);
        bits_a.set(3, true);
        a.bitmap = Some((0, bits_a));

        let mut b = set_from(2, vec![plain(3, 1), plain(9, 1)], "b");
        let mut bits_b = BitVec::from_elem(10, false);
        bits_b.set(3, true);
        bits_b.set(9, true);
        b.bitmap = Some((0, bits_b));

        let out = combine(
            vec![a.clone(), b.clone()],
            &and_spec(),
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(doc_ids(&out), vec![3]);
        assert!(out.bitmap.is_some());

        let out = combine(vec![a, b], &or_spec(), None, &CancelToken::new()).unwrap();
        assert_eq!(doc_ids(&out), vec![1, 3, 9]);
    }
}
