//! Decompositions of global constraints into primitive constraints, used when
//! a target does not support a global constraint natively.
//!
//! All decompositions expect the arguments of the global constraint to be
//! leaves. The resulting constraints are not necessarily flat.

use itertools::Itertools;

use crate::{
	expression::{Expr, GlobalConstraint, GlobalName, Operator, OperatorName, Relation},
	model::{VarArena, VarOrigin},
	IntVal, ReformulationError,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// The decomposition of a Boolean-valued global constraint.
///
/// The global constraint holds exactly when the conjunction of the `checks`
/// holds, where the auxiliary variables introduced by the decomposition take
/// the values fixed by the `definitions`. The definitions can be satisfied for
/// every assignment of the arguments, so they can be posted unconditionally
/// when the global constraint is reified or negated.
pub(crate) struct Decomposition {
	/// Constraints that define the auxiliary variables of the decomposition.
	pub(crate) definitions: Vec<Expr>,
	/// Constraints whose conjunction is equivalent to the global constraint.
	pub(crate) checks: Vec<Expr>,
}

impl Decomposition {
	/// A decomposition without auxiliary variables.
	fn checks(checks: Vec<Expr>) -> Self {
		Self {
			definitions: Vec::new(),
			checks,
		}
	}
}

/// Decompose a Boolean-valued global constraint into primitive constraints.
///
/// Decompositions might introduce auxiliary variables in `arena`.
pub(crate) fn decompose_constraint(
	arena: &mut VarArena,
	global: &GlobalConstraint,
) -> Result<Decomposition, ReformulationError> {
	let args = &global.args;
	match global.name {
		GlobalName::AllDifferent => Ok(Decomposition::checks(
			args.iter()
				.tuple_combinations()
				.map(|(a, b)| a.clone().ne(b.clone()))
				.collect(),
		)),
		GlobalName::AllEqual => Ok(Decomposition::checks(
			args.iter()
				.skip(1)
				.map(|x| x.clone().eq(args[0].clone()))
				.collect(),
		)),
		GlobalName::Circuit => circuit(arena, args),
		GlobalName::Cumulative => cumulative(arena, args).map(Decomposition::checks),
		GlobalName::Element | GlobalName::Maximum | GlobalName::Minimum => {
			Err(ReformulationError::malformed(
				global.to_string(),
				"an integer-valued global function cannot be used as a constraint",
			))
		}
	}
}

/// Decompose `global == target`, for an integer-valued global function, into a
/// list of constraints whose conjunction is equivalent to it.
pub(crate) fn decompose_function(
	arena: &VarArena,
	global: &GlobalConstraint,
	target: &Expr,
) -> Result<Vec<Expr>, ReformulationError> {
	let args = &global.args;
	match global.name {
		GlobalName::Element => element(arena, args, target),
		GlobalName::Maximum => extremum(args, target, Relation::Ge),
		GlobalName::Minimum => extremum(args, target, Relation::Le),
		GlobalName::AllDifferent
		| GlobalName::AllEqual
		| GlobalName::Circuit
		| GlobalName::Cumulative => Err(ReformulationError::malformed(
			global.to_string(),
			"a Boolean global constraint cannot be used as an integer expression",
		)),
	}
}

/// Decompose `circuit(succ)` by following the successors from node `0`.
///
/// Auxiliary variables `order[i]` hold the node reached after `i + 1` steps.
/// The successors form a single cycle when all visited nodes are different and
/// node `0` is reached after exactly `n` steps. The steps are only defined
/// through successors that are nodes, so that `order` is fixed by `succ`
/// whenever all successors are in range.
fn circuit(arena: &mut VarArena, succ: &[Expr]) -> Result<Decomposition, ReformulationError> {
	let Some(first) = succ.first() else {
		return Err(ReformulationError::malformed(
			GlobalName::Circuit.symbol(),
			"expected at least one argument",
		));
	};
	if succ.len() == 1 {
		return Ok(Decomposition::checks(vec![first.clone().eq(0)]));
	}
	let last = succ.len() as IntVal - 1;
	let order: Vec<Expr> = (0..succ.len())
		.map(|_| Expr::IntVar(arena.new_int(0, last, VarOrigin::Auxiliary)))
		.collect();
	// `succ[k]` is a node
	let in_range: Vec<Vec<Expr>> = succ
		.iter()
		.map(|s| {
			let (lb, ub) = arena.bounds(s);
			if lb >= 0 && ub <= last {
				Vec::new()
			} else {
				vec![s.clone().ge(0), s.clone().le(last)]
			}
		})
		.collect();

	let mut definitions = vec![if in_range[0].is_empty() {
		order[0].clone().eq(first.clone())
	} else {
		Expr::all(in_range[0].clone())?.implies(order[0].clone().eq(first.clone()))?
	}];
	for (prev, cur) in order.iter().tuple_windows() {
		for (k, s) in succ.iter().enumerate() {
			let premise = Expr::all(
				in_range[k]
					.iter()
					.cloned()
					.chain([prev.clone().eq(k as IntVal)]),
			)?;
			definitions.push(premise.implies(cur.clone().eq(s.clone()))?);
		}
	}

	let mut checks = vec![Expr::global(GlobalName::AllDifferent, succ.to_vec())?];
	checks.extend(in_range.into_iter().flatten());
	checks.push(Expr::global(GlobalName::AllDifferent, order.clone())?);
	checks.push(order[order.len() - 1].clone().eq(0));
	Ok(Decomposition {
		definitions,
		checks,
	})
}

/// Decompose `cumulative(start, duration, end, demand, capacity)` into task
/// consistency constraints and a resource constraint for every time point of
/// the horizon.
fn cumulative(arena: &VarArena, args: &[Expr]) -> Result<Vec<Expr>, ReformulationError> {
	let malformed = || {
		ReformulationError::malformed(
			GlobalName::Cumulative.symbol(),
			"expected four lists of equal length and a capacity",
		)
	};
	let n = args.len().checked_sub(1).ok_or_else(malformed)? / 4;
	let (start, rest) = args.split_at(n);
	let (duration, rest) = rest.split_at(n);
	let (end, rest) = rest.split_at(n);
	let (demand, capacity) = rest.split_at(n);
	let [capacity] = capacity else {
		return Err(malformed());
	};

	let mut cons = Vec::new();
	for i in 0..n {
		cons.push((start[i].clone() + duration[i].clone()).eq(end[i].clone()));
	}
	for x in duration.iter().chain(demand) {
		if !x.is_const() {
			cons.push(x.clone().ge(0));
		}
	}

	let horizon_lb = start.iter().map(|s| arena.bounds(s).0).min();
	let horizon_ub = end.iter().map(|e| arena.bounds(e).1).max();
	let (Some(lb), Some(ub)) = (horizon_lb, horizon_ub) else {
		return Ok(cons);
	};
	let fixed_demand: Option<Vec<IntVal>> = demand.iter().map(Expr::as_const).collect();
	for t in lb..=ub {
		let active = (0..n)
			.map(|i| Expr::all([start[i].clone().le(t), end[i].clone().gt(t)]))
			.collect::<Result<Vec<_>, _>>()?;
		let load = match &fixed_demand {
			Some(weights) => Expr::weighted_sum(weights.clone(), active)?,
			None => Expr::Operator(Operator::new(
				OperatorName::Sum,
				demand
					.iter()
					.zip(active)
					.map(|(h, a)| h.clone() * a)
					.collect(),
			)),
		};
		cons.push(load.le(capacity.clone()));
	}
	Ok(cons)
}

/// Decompose `element(array, index) == target`.
///
/// The index is restricted to the positions of the array.
fn element(
	arena: &VarArena,
	args: &[Expr],
	target: &Expr,
) -> Result<Vec<Expr>, ReformulationError> {
	let Some((index, array)) = args.split_last() else {
		return Err(ReformulationError::malformed(
			GlobalName::Element.symbol(),
			"expected a non-empty array and an index",
		));
	};
	let (lb, ub) = arena.bounds(index);
	let last = array.len() as IntVal - 1;
	let mut cons = Vec::new();
	for k in lb.max(0)..=ub.min(last) {
		cons.push(
			index
				.clone()
				.eq(k)
				.implies(target.clone().eq(array[k as usize].clone()))?,
		);
	}
	cons.push(index.clone().ge(0));
	cons.push(index.clone().le(last));
	Ok(cons)
}

/// Decompose `min(args) == target` (using [`Relation::Le`]) or `max(args) ==
/// target` (using [`Relation::Ge`]).
fn extremum(
	args: &[Expr],
	target: &Expr,
	relation: Relation,
) -> Result<Vec<Expr>, ReformulationError> {
	let mut cons: Vec<Expr> = args
		.iter()
		.map(|x| Expr::compare(relation, target.clone(), x.clone()))
		.collect();
	cons.push(Expr::any(args.iter().map(|x| x.clone().eq(target.clone())))?);
	Ok(cons)
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use itertools::Itertools;
	use proptest::prelude::*;
	use tracing_test::traced_test;

	use crate::{
		decompose::{decompose_constraint, decompose_function},
		expression::{Expr, GlobalConstraint, GlobalName, Relation},
		model::{Decision, IntVar, Model},
		IntVal,
	};

	/// Create a model with `n` integer variables with domain `lb..=ub`, and a
	/// global constraint over them (and the given constants).
	fn global_model(
		name: GlobalName,
		n: usize,
		lb: IntVal,
		ub: IntVal,
		extra: &[IntVal],
	) -> (Model, GlobalConstraint) {
		let mut prb = Model::default();
		let args = prb
			.new_int_vars(n, lb, ub)
			.into_iter()
			.map(Expr::from)
			.chain(extra.iter().map(|&c| Expr::Int(c)))
			.collect();
		(prb, GlobalConstraint { name, args })
	}

	/// Check that the decomposition of `global` holds for the same assignments
	/// of the variables of `prb` as the global constraint itself, after projecting
	/// away auxiliary variables.
	///
	/// When the global constraint is an integer function, its last argument is
	/// used as the target of the function.
	fn assert_decomposition_equivalent(mut prb: Model, global: GlobalConstraint) {
		let vars: Vec<Decision> = prb
			.arena
			.iter()
			.map(|(r, _)| Decision::Int(IntVar(r)))
			.collect();
		let mut direct = prb.clone();
		let decomposition = if global.name.is_boolean() {
			direct.add(Expr::Global(global.clone())).unwrap();
			let d = decompose_constraint(&mut prb.arena, &global).unwrap();
			d.definitions.into_iter().chain(d.checks).collect()
		} else {
			let (target, args) = global.args.split_last().unwrap();
			let function = GlobalConstraint {
				name: global.name,
				args: args.to_vec(),
			};
			direct
				.add(Expr::Global(function.clone()).eq(target.clone()))
				.unwrap();
			decompose_function(&prb.arena, &function, target).unwrap()
		};
		for con in decomposition {
			prb.add(con).unwrap();
		}
		assert_eq!(
			prb.brute_force_solutions(&vars),
			direct.brute_force_solutions(&vars)
		);
	}

	#[test]
	#[traced_test]
	fn test_decompose_all_different() {
		let (mut prb, global) = global_model(GlobalName::AllDifferent, 3, 1, 3, &[]);
		let d = decompose_constraint(&mut prb.arena, &global).unwrap();
		assert!(d.definitions.is_empty());
		expect![[r#"
    (x0 != x1)
    (x0 != x2)
    (x1 != x2)"#]]
		.assert_eq(&d.checks.iter().join("\n"));
	}

	#[test]
	#[traced_test]
	fn test_decompose_element() {
		let mut prb = Model::default();
		let arr = prb.new_int_vars(3, 0, 5);
		let idx = prb.new_int_var(-1, 1);
		let t = prb.new_int_var(0, 5);
		let global = GlobalConstraint {
			name: GlobalName::Element,
			args: arr.iter().chain([&idx]).map(|&v| Expr::from(v)).collect(),
		};
		let cons = decompose_function(&prb.arena, &global, &t.into()).unwrap();
		expect![[r#"
    ((x3 == 0) -> (x4 == x0))
    ((x3 == 1) -> (x4 == x1))
    (x3 >= 0)
    (x3 <= 2)"#]]
		.assert_eq(&cons.iter().join("\n"));
	}

	#[test]
	#[traced_test]
	fn test_decompose_circuit_single() {
		let (mut prb, global) = global_model(GlobalName::Circuit, 1, 0, 3, &[]);
		let d = decompose_constraint(&mut prb.arena, &global).unwrap();
		assert!(d.definitions.is_empty());
		expect!["(x0 == 0)"].assert_eq(&d.checks.iter().join("\n"));
	}

	#[test]
	#[traced_test]
	fn test_decompose_circuit_definitions() {
		// successors within the nodes need no range guards
		let (mut prb, global) = global_model(GlobalName::Circuit, 2, 0, 1, &[]);
		let d = decompose_constraint(&mut prb.arena, &global).unwrap();
		expect![[r#"
    (x2 == x0)
    ((x2 == 0) -> (x3 == x0))
    ((x2 == 1) -> (x3 == x1))"#]]
		.assert_eq(&d.definitions.iter().join("\n"));
		expect![[r#"
    alldifferent(x0, x1)
    alldifferent(x2, x3)
    (x3 == 0)"#]]
		.assert_eq(&d.checks.iter().join("\n"));
	}

	#[test]
	#[traced_test]
	fn test_decompose_circuit_reified() {
		// `b == circuit(succ)`, where successors can leave the nodes
		let (mut prb, global) = global_model(GlobalName::Circuit, 3, -1, 3, &[]);
		let b = prb.new_bool_var();
		let vars: Vec<Decision> = prb
			.arena
			.iter()
			.map(|(r, _)| Decision::Int(IntVar(r)))
			.collect();
		let mut direct = prb.clone();
		direct
			.add(Expr::compare(Relation::Eq, Expr::Global(global.clone()), b))
			.unwrap();
		let d = decompose_constraint(&mut prb.arena, &global).unwrap();
		for con in d.definitions {
			prb.add(con).unwrap();
		}
		prb.add(Expr::compare(Relation::Eq, Expr::all(d.checks).unwrap(), b))
			.unwrap();
		let expected = direct.brute_force_solutions(&vars);
		// every assignment of the successors occurs exactly once
		assert_eq!(expected.len(), 5_usize.pow(3));
		assert_eq!(prb.brute_force_solutions(&vars), expected);
	}

	#[test]
	#[traced_test]
	fn test_decompose_circuit_equivalent() {
		let (prb, global) = global_model(GlobalName::Circuit, 3, -1, 3, &[]);
		assert_decomposition_equivalent(prb, global);
	}

	#[test]
	#[traced_test]
	fn test_decompose_cumulative_equivalent() {
		// two tasks with fixed durations and demands, capacity 2
		let mut prb = Model::default();
		let start = prb.new_int_vars(2, 0, 3);
		let end = prb.new_int_vars(2, 0, 5);
		let global = GlobalConstraint {
			name: GlobalName::Cumulative,
			args: start
				.iter()
				.map(|&v| Expr::from(v))
				.chain([Expr::Int(2), Expr::Int(1)])
				.chain(end.iter().map(|&v| Expr::from(v)))
				.chain([Expr::Int(2), Expr::Int(1), Expr::Int(2)])
				.collect(),
		};
		assert_decomposition_equivalent(prb, global);
	}

	#[test]
	#[traced_test]
	fn test_decompose_cumulative_variable_demand() {
		let mut prb = Model::default();
		let start = prb.new_int_vars(2, 0, 2);
		let dur = prb.new_int_var(0, 2);
		let end = prb.new_int_vars(2, 0, 3);
		let demand = prb.new_int_var(-1, 2);
		let global = GlobalConstraint {
			name: GlobalName::Cumulative,
			args: [start[0], start[1], dur]
				.into_iter()
				.map(Expr::from)
				.chain([Expr::Int(1)])
				.chain([end[0], end[1], demand].into_iter().map(Expr::from))
				.chain([Expr::Int(1), Expr::Int(2)])
				.collect(),
		};
		assert_decomposition_equivalent(prb, global);
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(24))]

		#[test]
		fn prop_all_different_equivalent(n in 2_usize..=4, lb in -2_i64..=0, width in 0_i64..=3) {
			let (prb, global) = global_model(GlobalName::AllDifferent, n, lb, lb + width, &[]);
			assert_decomposition_equivalent(prb, global);
		}

		#[test]
		fn prop_all_equal_equivalent(
			n in 1_usize..=3,
			lb in -2_i64..=0,
			width in 0_i64..=3,
			c in -2_i64..=2,
		) {
			let (prb, global) = global_model(GlobalName::AllEqual, n, lb, lb + width, &[c]);
			assert_decomposition_equivalent(prb, global);
		}

		#[test]
		fn prop_extremum_equivalent(
			max in any::<bool>(),
			n in 1_usize..=3,
			lb in -2_i64..=0,
			width in 0_i64..=3,
		) {
			// the last variable is the target of the function
			let name = if max { GlobalName::Maximum } else { GlobalName::Minimum };
			let (prb, global) = global_model(name, n + 1, lb, lb + width, &[]);
			assert_decomposition_equivalent(prb, global);
		}

		#[test]
		fn prop_element_equivalent(n in 1_usize..=3, lb in -1_i64..=1, c in 0_i64..=2) {
			// array of `n` variables, a constant element, an index, and a target
			let mut prb = Model::default();
			let mut args: Vec<Expr> =
				prb.new_int_vars(n, lb, lb + 2).into_iter().map(Expr::from).collect();
			args.push(Expr::Int(c));
			args.push(prb.new_int_var(-1, n as IntVal + 1).into());
			args.push(prb.new_int_var(lb, lb + 2).into());
			let global = GlobalConstraint { name: GlobalName::Element, args };
			assert_decomposition_equivalent(prb, global);
		}
	}
}
