//! SimpleFactor: element-wise factorization of entity and relation.
//!
//! The query is the Hadamard product of head and relation, scored against
//! the tail with a dot product. This is DistMult with the tail kept on the
//! candidate side so it can be batched against every item with one matmul.
//!
//! ```text
//! score = <h ⊙ r, t> + b_h + b_t
//! ```

use super::euclidean_rhs;
use crate::error::Result;
use crate::model::{column, CfModel, EmbeddingTables, ModelConfig, HEAD, RELATION};
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

/// Dot-product factorization head.
#[derive(Debug, Clone)]
pub struct SimpleFactor {
    tables: EmbeddingTables,
}

impl SimpleFactor {
    pub fn new(config: &ModelConfig, item_ids: &[u32], vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            tables: EmbeddingTables::new(config, item_ids, vb)?,
        })
    }
}

impl CfModel for SimpleFactor {
    fn name(&self) -> &'static str {
        "SimpleFactor"
    }

    fn tables(&self) -> &EmbeddingTables {
        &self.tables
    }

    fn get_lhs(&self, input: &Tensor) -> Result<Tensor> {
        let heads = self.tables.entities(&column(input, HEAD)?)?;
        let relations = self.tables.relations(&column(input, RELATION)?)?;
        Ok((heads * relations)?)
    }

    fn get_rhs(&self, input: &Tensor) -> Result<Tensor> {
        euclidean_rhs(&self.tables, input)
    }

    fn similarity_score(&self, lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor> {
        if all_items {
            Ok(lhs.matmul(&rhs.t()?)?)
        } else {
            Ok((lhs * rhs)?.sum_keepdim(D::Minus1)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::input_tensor;
    use crate::models::test_util::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_simple_factor_dot_product() {
        let varmap = VarMap::new();
        let vb = varbuilder(&varmap);
        let model = SimpleFactor::new(&ModelConfig::new(3, 1, 3), &[1, 2], &vb).unwrap();
        set_var(
            &varmap,
            "entities.weight",
            &[&[1.0, 0.5, 0.0], &[0.5, 1.0, 0.0], &[2.0, 0.0, 1.0]],
        );
        set_var(&varmap, "relations.weight", &[&[1.0, 1.0, 1.0]]);

        let input = input_tensor(&[(0, 0, 1), (0, 0, 2)], &Device::Cpu).unwrap();
        let scores = model.score_triples(&input).unwrap();
        // 1*1*0.5 + 0.5*1*1 + 0
        assert_close(scores[0], 1.0);
        assert_close(scores[1], 2.0);

        let all = model.score_all_items(&input).unwrap();
        assert_close(all[0][0], 1.0);
        assert_close(all[0][1], 2.0);
    }

    #[test]
    fn test_simple_factor_similarity_shapes() {
        let varmap = VarMap::new();
        let vb = varbuilder(&varmap);
        let model = SimpleFactor::new(&ModelConfig::new(4, 2, 5), &[0, 1, 2], &vb).unwrap();
        let dev = Device::Cpu;

        let lhs = Tensor::ones((2, 5), candle_core::DType::F32, &dev).unwrap();
        let rhs = Tensor::ones((3, 5), candle_core::DType::F32, &dev).unwrap();
        let all = model.similarity_score(&lhs, &rhs, true).unwrap();
        assert_eq!(all.dims(), &[2, 3]);

        let rhs = Tensor::ones((2, 5), candle_core::DType::F32, &dev).unwrap();
        let pairs = model.similarity_score(&lhs, &rhs, false).unwrap();
        assert_eq!(pairs.dims(), &[2, 1]);
        assert_close(row(&pairs)[0], 5.0);
    }
}
