use crate::align::{AnnouncementContext, EvalContext};
use crate::error::FactorError;
use crate::expr::Expression;
use crate::parser::Parser;
use crate::types::{Bindings, FactorRequest, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileManifest {
    /// Number of requested formulas.
    pub expr_count: usize,
    /// Distinct formula texts actually parsed.
    pub unique_formula_count: usize,
    /// Formulas served from an identical earlier formula.
    pub cache_hit_count: usize,
    /// Free identifiers not produced by an earlier output.
    pub input_count: usize,
    /// End-to-end compile latency in microseconds.
    pub compile_time_us: u64,
}

impl CompileManifest {
    #[inline]
    pub fn summary_line(&self) -> String {
        format!(
            "exprs={} unique={} cache_hits={} inputs={} compile_us={}",
            self.expr_count,
            self.unique_formula_count,
            self.cache_hit_count,
            self.input_count,
            self.compile_time_us
        )
    }
}

/// A named batch of compiled formulas evaluated in request order.
///
/// Each output is visible to later formulas under its name, so
/// `["Rank(close)", "f0 * 2"]` doubles the rank.
#[derive(Debug, Clone)]
pub struct FactorSet {
    outputs: Vec<(String, Arc<Expression>)>,
    inputs: Vec<String>,
    manifest: CompileManifest,
}

impl FactorSet {
    /// Compiles with a parser built from `req.opts`.
    pub fn from_request(req: &FactorRequest) -> Result<Self, FactorError> {
        Self::compile(&Parser::with_options(&req.opts), req)
    }

    /// Compiles with `parser`'s tables; `req.opts` is not consulted.
    pub fn compile(parser: &Parser, req: &FactorRequest) -> Result<Self, FactorError> {
        if req.exprs.is_empty() {
            return Err(FactorError::EmptyRequest);
        }
        if !req.outputs.is_empty() && req.outputs.len() != req.exprs.len() {
            return Err(FactorError::OutputCount {
                exprs: req.exprs.len(),
                outputs: req.outputs.len(),
            });
        }
        let started_at = Instant::now();

        let mut by_text: HashMap<&str, Arc<Expression>> = HashMap::new();
        let mut names: HashSet<String> = HashSet::with_capacity(req.exprs.len());
        let mut outputs = Vec::with_capacity(req.exprs.len());
        let mut inputs: Vec<String> = Vec::new();
        let mut cache_hit_count = 0usize;

        for (idx, formula) in req.exprs.iter().enumerate() {
            let name = req
                .outputs
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("f{idx}"));
            if names.contains(&name) {
                return Err(FactorError::DuplicateOutput { name });
            }

            let key = formula.trim();
            let expr = match by_text.get(key) {
                Some(expr) => {
                    cache_hit_count += 1;
                    expr.clone()
                }
                None => {
                    let expr = parser
                        .parse(key)
                        .map(Arc::new)
                        .map_err(|source| FactorError::Compile {
                            output: name.clone(),
                            source,
                        })?;
                    by_text.insert(key, expr.clone());
                    expr
                }
            };
            for var in expr.variables() {
                if !names.contains(&var) && !inputs.contains(&var) {
                    inputs.push(var);
                }
            }
            names.insert(name.clone());
            outputs.push((name, expr));
        }

        let manifest = CompileManifest {
            expr_count: req.exprs.len(),
            unique_formula_count: by_text.len(),
            cache_hit_count,
            input_count: inputs.len(),
            compile_time_us: started_at.elapsed().as_micros() as u64,
        };
        debug!(summary = %manifest.summary_line(), "compiled factor set");
        Ok(Self {
            outputs,
            inputs,
            manifest,
        })
    }

    #[inline]
    pub fn manifest(&self) -> &CompileManifest {
        &self.manifest
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(name, _)| name.as_str())
    }

    pub fn expression(&self, output: &str) -> Option<&Arc<Expression>> {
        self.outputs
            .iter()
            .find(|(name, _)| name == output)
            .map(|(_, expr)| expr)
    }

    /// Identifiers the caller must bind, in order of first use.
    #[inline]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Evaluates every formula in request order and returns `(output, value)` pairs.
    pub fn evaluate(
        &self,
        bindings: &Bindings,
        announcements: Option<&AnnouncementContext>,
    ) -> Result<Vec<(String, Value)>, FactorError> {
        self.evaluate_with(bindings, EvalContext::new(announcements))
    }

    /// [`FactorSet::evaluate`] with an explicit context, e.g. one from
    /// [`EvalContext::forced`].
    pub fn evaluate_with(
        &self,
        bindings: &Bindings,
        ctx: EvalContext<'_>,
    ) -> Result<Vec<(String, Value)>, FactorError> {
        let mut working = bindings.clone();
        let mut results = Vec::with_capacity(self.outputs.len());
        for (name, expr) in &self.outputs {
            let value = expr
                .evaluate_with(&working, ctx)
                .map_err(|source| FactorError::Eval {
                    output: name.clone(),
                    source,
                })?;
            working.insert(name.clone(), value.clone());
            results.push((name.clone(), value));
        }
        Ok(results)
    }
}
