//! Free-variable inspection for job expressions.
//!
//! The shallow decode pass scans every attribute expression for traversals
//! rooted at the `jobs` variable; each `jobs.<name>` reference makes the
//! referenced job a predecessor of the job under decode.

use std::collections::BTreeSet;

use hcl::expr::{Expression, ObjectKey, Operation, TraversalOperator};
use hcl::template::{Directive, Element, Template};

/// Collect the names of jobs referenced via `jobs.<name>` anywhere inside
/// the expression, including template interpolations and directives.
pub(crate) fn collect_job_refs(expr: &Expression, refs: &mut BTreeSet<String>) {
  match expr {
    Expression::Array(items) => {
      for item in items {
        collect_job_refs(item, refs);
      }
    }
    Expression::Object(entries) => {
      for (key, value) in entries.iter() {
        if let ObjectKey::Expression(key_expr) = key {
          collect_job_refs(key_expr, refs);
        }
        collect_job_refs(value, refs);
      }
    }
    Expression::TemplateExpr(template) => {
      if let Ok(parsed) = Template::from_expr(template) {
        collect_template_refs(&parsed, refs);
      }
    }
    Expression::Traversal(traversal) => {
      match &traversal.expr {
        Expression::Variable(variable) if variable.as_str() == "jobs" => {
          // A bare `jobs` variable carries no job name; only an attribute
          // access names a dependency.
          if let Some(TraversalOperator::GetAttr(attr)) = traversal.operators.first() {
            refs.insert(attr.as_str().to_string());
          }
        }
        other => collect_job_refs(other, refs),
      }
      for operator in &traversal.operators {
        if let TraversalOperator::Index(index_expr) = operator {
          collect_job_refs(index_expr, refs);
        }
      }
    }
    Expression::FuncCall(call) => {
      for arg in &call.args {
        collect_job_refs(arg, refs);
      }
    }
    Expression::Parenthesis(inner) => collect_job_refs(inner, refs),
    Expression::Conditional(conditional) => {
      collect_job_refs(&conditional.cond_expr, refs);
      collect_job_refs(&conditional.true_expr, refs);
      collect_job_refs(&conditional.false_expr, refs);
    }
    Expression::Operation(operation) => match operation.as_ref() {
      Operation::Unary(unary) => collect_job_refs(&unary.expr, refs),
      Operation::Binary(binary) => {
        collect_job_refs(&binary.lhs_expr, refs);
        collect_job_refs(&binary.rhs_expr, refs);
      }
    },
    Expression::ForExpr(for_expr) => {
      collect_job_refs(&for_expr.collection_expr, refs);
      if let Some(key_expr) = &for_expr.key_expr {
        collect_job_refs(key_expr, refs);
      }
      collect_job_refs(&for_expr.value_expr, refs);
      if let Some(cond_expr) = &for_expr.cond_expr {
        collect_job_refs(cond_expr, refs);
      }
    }
    _ => {}
  }
}

fn collect_template_refs(template: &Template, refs: &mut BTreeSet<String>) {
  for element in template.elements() {
    match element {
      Element::Literal(_) => {}
      Element::Interpolation(interpolation) => collect_job_refs(&interpolation.expr, refs),
      Element::Directive(Directive::If(directive)) => {
        collect_job_refs(&directive.cond_expr, refs);
        collect_template_refs(&directive.true_template, refs);
        if let Some(false_template) = &directive.false_template {
          collect_template_refs(false_template, refs);
        }
      }
      Element::Directive(Directive::For(directive)) => {
        collect_job_refs(&directive.collection_expr, refs);
        collect_template_refs(&directive.template, refs);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn refs_of(source: &str) -> BTreeSet<String> {
    let body = hcl::parse(&format!("x = {source}\n")).expect("valid hcl");
    let attr = body.attributes().next().expect("one attribute");
    let mut refs = BTreeSet::new();
    collect_job_refs(&attr.expr, &mut refs);
    refs
  }

  fn names(refs: &BTreeSet<String>) -> Vec<&str> {
    refs.iter().map(String::as_str).collect()
  }

  #[test]
  fn test_plain_traversal() {
    let refs = refs_of("jobs.build.outputs");
    assert_eq!(names(&refs), vec!["build"]);
  }

  #[test]
  fn test_template_interpolation() {
    let refs = refs_of(r#""prefix ${jobs.build.outputs[0]} suffix""#);
    assert_eq!(names(&refs), vec!["build"]);
  }

  #[test]
  fn test_nested_collections_and_calls() {
    let refs = refs_of(r#"concat([jobs.a.outputs], [upper(jobs.b.image)])"#);
    assert_eq!(names(&refs), vec!["a", "b"]);
  }

  #[test]
  fn test_other_roots_are_ignored() {
    let refs = refs_of(r#""${env.HOME}/${secrets.TOKEN}""#);
    assert!(refs.is_empty());
  }

  #[test]
  fn test_bare_jobs_variable_is_ignored() {
    let refs = refs_of("jobs");
    assert!(refs.is_empty());
  }

  #[test]
  fn test_index_expression_operand() {
    let refs = refs_of("jobs.a.outputs[length(jobs.b.outputs)]");
    assert_eq!(names(&refs), vec!["a", "b"]);
  }
}
