//! Translation of satisfying assignments of the encoding back into values of
//! the decision variables of a [`crate::Model`].

use index_vec::IndexVec;
use itertools::Itertools;
use pindakaas::Valuation;
use tracing::trace;

use crate::{
	encode::IndicatorMap,
	model::{VarArena, VarKind, VarRef},
	IntVal, ReformulationError,
};

/// Compute the value of every variable in `arena` from a satisfying assignment
/// of the encoding.
///
/// Integer variables take the value of their single true indicator variable,
/// and integer variables that have not been encoded remain without a value.
pub(crate) fn extract<V: Valuation + ?Sized>(
	arena: &VarArena,
	indicators: &IndicatorMap,
	sol: &V,
) -> Result<IndexVec<VarRef, Option<IntVal>>, ReformulationError> {
	let mut values: IndexVec<VarRef, Option<IntVal>> = arena
		.iter()
		.map(|(_, def)| match def.kind {
			VarKind::Bool(lit) => Some(IntVal::from(sol.value(lit))),
			VarKind::Int { .. } => None,
		})
		.collect();
	for (var, ind) in indicators.iter() {
		let val = ind
			.iter()
			.filter(|&(_, b)| values[b.0] == Some(1))
			.exactly_one()
			.map_err(|err| ReformulationError::EncodingInvariantViolation {
				var,
				true_count: err.count(),
			})?;
		values[var.0] = Some(val.0);
	}
	trace!(
		vars = values.len(),
		ints = indicators.len(),
		"extract solution"
	);
	Ok(values)
}

#[cfg(test)]
mod tests {
	use index_vec::IndexVec;
	use pindakaas::{Lit as RawLit, Valuation};
	use tracing_test::traced_test;

	use crate::{
		extract::extract,
		model::{IntVar, Model, VarRef},
		EncodeConfig, IntVal, ReformulationError,
	};

	/// Assignment in which exactly the listed literals are true.
	struct TrueLits(Vec<RawLit>);

	impl Valuation for TrueLits {
		fn value(&self, lit: RawLit) -> bool {
			self.0.contains(&lit)
		}
	}

	/// Value of an integer variable in extracted values.
	fn int_value(values: &IndexVec<VarRef, Option<IntVal>>, var: IntVar) -> Option<IntVal> {
		values.get(var.0).copied().flatten()
	}

	#[test]
	#[traced_test]
	fn test_extract_values() {
		let mut prb = Model::default();
		let x = prb.new_int_var(2, 7);
		let b = prb.new_bool_var();
		let y = prb.new_int_var(0, 1);
		prb.encode(&EncodeConfig::default()).unwrap();

		let x6 = prb.indicators().get(x).unwrap().get(6).unwrap();
		let y0 = prb.indicators().get(y).unwrap().get(0).unwrap();
		let sol = TrueLits(vec![x6.into(), y0.into(), b.into()]);
		let values = extract(&prb.arena, prb.indicators(), &sol).unwrap();
		assert_eq!(int_value(&values, x), Some(6));
		assert_eq!(int_value(&values, y), Some(0));
		assert_eq!(values[b.0], Some(1));
		assert_eq!(values[x6.0], Some(1));
		assert_eq!(values[y0.0], Some(1));
		let x2 = prb.indicators().get(x).unwrap().get(2).unwrap();
		assert_eq!(values[x2.0], Some(0));
	}

	#[test]
	#[traced_test]
	fn test_extract_unencoded() {
		let mut prb = Model::default();
		let b = prb.new_bool_var();
		prb.encode(&EncodeConfig::default()).unwrap();
		let x = prb.new_int_var(0, 3);
		let values = extract(&prb.arena, prb.indicators(), &TrueLits(Vec::new())).unwrap();
		assert_eq!(int_value(&values, x), None);
		assert_eq!(values[b.0], Some(0));
	}

	#[test]
	#[traced_test]
	fn test_extract_violation() {
		let mut prb = Model::default();
		let x = prb.new_int_var(0, 3);
		prb.encode(&EncodeConfig::default()).unwrap();
		let ind = prb.indicators().get(x).unwrap();
		let sol = TrueLits(ind.iter().map(|(_, b)| b.into()).collect());
		assert_eq!(
			extract(&prb.arena, prb.indicators(), &sol),
			Err(ReformulationError::EncodingInvariantViolation {
				var: x,
				true_count: 4
			})
		);
		let err = extract(&prb.arena, prb.indicators(), &TrueLits(Vec::new())).unwrap_err();
		assert_eq!(
			err.to_string(),
			"integer variable x0 has 0 true indicators, expected exactly one"
		);
	}
}
