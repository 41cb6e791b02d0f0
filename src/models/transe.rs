//! TransE: Relations as Translations.
//!
//! TransE ([Bordes et al. 2013](https://papers.nips.cc/paper/2013/hash/1cecc7a77928ca8133fa24680a88d2f9-Abstract.html))
//! interprets relations as translations in embedding space:
//!
//! ```text
//! h + r ≈ t  (if the triple is true)
//! ```
//!
//! # Scoring
//!
//! Score = -||h + r - t||² + b_h + b_t
//!
//! Two departures from the original paper keep it comparable with the other
//! heads in this crate:
//! - No L2 normalization is applied to entity embeddings
//! - The score uses the *squared* Euclidean distance

use super::{euclidean_rhs, euclidean_similarity};
use crate::error::Result;
use crate::model::{column, CfModel, EmbeddingTables, ModelConfig, HEAD, RELATION};
use candle_core::Tensor;
use candle_nn::VarBuilder;

/// TransE scoring head.
#[derive(Debug, Clone)]
pub struct TransE {
    tables: EmbeddingTables,
}

impl TransE {
    pub fn new(config: &ModelConfig, item_ids: &[u32], vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            tables: EmbeddingTables::new(config, item_ids, vb)?,
        })
    }
}

impl CfModel for TransE {
    fn name(&self) -> &'static str {
        "TransE"
    }

    fn tables(&self) -> &EmbeddingTables {
        &self.tables
    }

    fn get_lhs(&self, input: &Tensor) -> Result<Tensor> {
        let heads = self.tables.entities(&column(input, HEAD)?)?;
        let relations = self.tables.relations(&column(input, RELATION)?)?;
        Ok((heads + relations)?)
    }

    fn get_rhs(&self, input: &Tensor) -> Result<Tensor> {
        euclidean_rhs(&self.tables, input)
    }

    fn similarity_score(&self, lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor> {
        euclidean_similarity(lhs, rhs, all_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::input_tensor;
    use crate::models::test_util::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn fixed_model(varmap: &VarMap) -> TransE {
        let vb = varbuilder(varmap);
        let config = ModelConfig::new(3, 1, 2);
        let model = TransE::new(&config, &[1, 2], &vb).unwrap();
        set_var(
            varmap,
            "entities.weight",
            &[&[1.0, 0.0], &[1.0, 1.0], &[3.0, 0.0]],
        );
        set_var(varmap, "relations.weight", &[&[0.0, 1.0]]);
        model
    }

    #[test]
    fn test_transe_score_is_negative_sq_distance() {
        let varmap = VarMap::new();
        let model = fixed_model(&varmap);

        // h + r = (1, 1) = entity 1 exactly
        let input = input_tensor(&[(0, 0, 1), (0, 0, 2)], &Device::Cpu).unwrap();
        let scores = model.score_triples(&input).unwrap();
        assert_close(scores[0], 0.0);
        // (1, 1) vs (3, 0): 4 + 1
        assert_close(scores[1], -5.0);
    }

    #[test]
    fn test_transe_lhs() {
        let varmap = VarMap::new();
        let model = fixed_model(&varmap);
        let input = input_tensor(&[(2, 0, 1)], &Device::Cpu).unwrap();
        assert_eq!(row(&model.get_lhs(&input).unwrap()), vec![3.0, 1.0]);
    }

    #[test]
    fn test_transe_biases_are_added() {
        let varmap = VarMap::new();
        let model = fixed_model(&varmap);
        set_var(&varmap, "bias_head.weight", &[&[0.5], &[0.0], &[0.0]]);
        set_var(&varmap, "bias_tail.weight", &[&[0.0], &[0.25], &[0.0]]);

        let input = input_tensor(&[(0, 0, 1)], &Device::Cpu).unwrap();
        assert_close(model.score_triples(&input).unwrap()[0], 0.75);
    }

    #[test]
    fn test_transe_predict_tail_ranks_exact_match_first() {
        let varmap = VarMap::new();
        let model = fixed_model(&varmap);

        let predictions = model.predict_tail(0, 0, 2).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].item, 1);
        assert_eq!(predictions[1].item, 2);
        assert!(predictions[0].score >= predictions[1].score);
    }

    #[test]
    fn test_transe_out_of_range_id_errors() {
        let varmap = VarMap::new();
        let model = fixed_model(&varmap);
        let input = input_tensor(&[(7, 0, 1)], &Device::Cpu).unwrap();
        assert!(model.forward(&input, false).is_err());
    }
}
