//! Rule template engines.
//!
//! A rule is an opaque predicate over one candidate. [`RhaiRuleEngine`]
//! compiles templates as sandboxed Rhai expressions; other engines can be
//! plugged in through [`RuleEngine`].

use std::collections::BTreeMap;
use std::sync::Arc;

use rhai::{Dynamic, Engine, LexError, ParseError, ParseErrorType, Scope, AST};

use super::error::DiscriminatorError;

/// Default maximum number of operations per evaluation.
const DEFAULT_MAX_OPERATIONS: u64 = 10_000;

/// Default maximum call stack depth.
const DEFAULT_MAX_CALL_STACK_DEPTH: usize = 16;

/// Default maximum string size in bytes.
const DEFAULT_MAX_STRING_SIZE: usize = 65536;

/// Default maximum array size.
const DEFAULT_MAX_ARRAY_SIZE: usize = 1_000;

/// Default maximum map size.
const DEFAULT_MAX_MAP_SIZE: usize = 1_000;

/// A candidate with its resolved discriminator attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorCandidate {
    /// Candidate account identifier.
    pub dn: String,
    /// Configured field name to its single value, `None` when missing or
    /// multi-valued.
    pub attributes: BTreeMap<String, Option<String>>,
}

impl DiscriminatorCandidate {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.attributes
            .insert(name.into(), value.map(str::to_string));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }
}

/// A compiled rule template.
pub trait CompiledRule: Send + Sync {
    /// The template source, for diagnostics.
    fn template(&self) -> &str;

    /// Evaluate against one candidate.
    fn matches(&self, candidate: &DiscriminatorCandidate) -> Result<bool, DiscriminatorError>;
}

/// Compiles rule templates.
pub trait RuleEngine: Send + Sync {
    /// Compile `template` for candidates carrying `fields`.
    ///
    /// Unknown variables are a compile error.
    fn compile(
        &self,
        template: &str,
        fields: &[String],
    ) -> Result<Box<dyn CompiledRule>, DiscriminatorError>;
}

/// Resource limits for rule evaluation.
#[derive(Debug, Clone)]
pub struct RhaiRuleConfig {
    /// Maximum number of operations before termination.
    pub max_operations: u64,
    /// Maximum call stack depth.
    pub max_call_stack_depth: usize,
    /// Maximum string size in bytes.
    pub max_string_size: usize,
    /// Maximum array size.
    pub max_array_size: usize,
    /// Maximum map size.
    pub max_map_size: usize,
}

impl Default for RhaiRuleConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_stack_depth: DEFAULT_MAX_CALL_STACK_DEPTH,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
        }
    }
}

/// Rule engine evaluating templates as Rhai expressions.
///
/// Templates see `dn`, one variable per configured field, and `value` when
/// exactly one field is configured. Missing attributes are `()`; use
/// `is_defined(x)` or `is_missing(x)` to test for them. A surrounding
/// `{{ ... }}` is accepted and stripped.
pub struct RhaiRuleEngine {
    engine: Arc<Engine>,
}

impl RhaiRuleEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RhaiRuleConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RhaiRuleConfig) -> Self {
        Self {
            engine: Arc::new(create_engine(&config)),
        }
    }
}

impl Default for RhaiRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a sandboxed engine. Expressions only: no loops, no functions.
fn create_engine(config: &RhaiRuleConfig) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_stack_depth);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);

    engine.set_allow_looping(false);
    engine.set_strict_variables(true);

    engine.register_fn("is_defined", |x: Dynamic| !x.is_unit());
    engine.register_fn("is_missing", |x: Dynamic| x.is_unit());

    engine
}

/// Strip one pair of `{{ }}` delimiters, if present.
pub fn strip_delimiters(template: &str) -> &str {
    let trimmed = template.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map_or(trimmed, str::trim)
}

/// Rhai spelling for Jinja-style literals that do not parse.
fn syntax_hint(error: &ParseError) -> Option<&'static str> {
    match error.err_type() {
        ParseErrorType::BadInput(LexError::MalformedChar(_)) => {
            Some(r#"Rhai strings use double quotes, e.g. value == "foo_sn""#)
        }
        ParseErrorType::VariableUndefined(name) if name == "True" || name == "False" => {
            Some("Rhai booleans are lowercase: true, false")
        }
        ParseErrorType::VariableUndefined(name) if name == "None" => {
            Some("test absent attributes with is_missing(x) or !is_defined(x)")
        }
        _ => None,
    }
}

impl RuleEngine for RhaiRuleEngine {
    fn compile(
        &self,
        template: &str,
        fields: &[String],
    ) -> Result<Box<dyn CompiledRule>, DiscriminatorError> {
        let expression = strip_delimiters(template);
        let rule = RhaiRule {
            engine: Arc::clone(&self.engine),
            ast: AST::empty(),
            template: template.to_string(),
            fields: fields.to_vec(),
        };

        let scope = rule.scope(None);
        let ast = self
            .engine
            .compile_expression_with_scope(&scope, expression)
            .map_err(|e| DiscriminatorError::TemplateCompile {
                template: template.to_string(),
                message: match syntax_hint(&e) {
                    Some(hint) => format!("{e} ({hint})"),
                    None => e.to_string(),
                },
            })?;

        Ok(Box::new(RhaiRule { ast, ..rule }))
    }
}

struct RhaiRule {
    engine: Arc<Engine>,
    ast: AST,
    template: String,
    fields: Vec<String>,
}

impl RhaiRule {
    /// Variables for `candidate`; all unit when compiling.
    ///
    /// Pushed as plain variables: constants in a compile scope would be
    /// folded into the AST by the optimizer.
    fn scope(&self, candidate: Option<&DiscriminatorCandidate>) -> Scope<'static> {
        let lookup = |field: &str| -> Dynamic {
            candidate
                .and_then(|c| c.attribute(field))
                .map_or(Dynamic::UNIT, |v| Dynamic::from(v.to_string()))
        };

        let mut scope = Scope::new();
        scope.push_dynamic(
            "dn",
            candidate.map_or(Dynamic::UNIT, |c| Dynamic::from(c.dn.clone())),
        );
        for field in &self.fields {
            scope.push_dynamic(field.as_str(), lookup(field));
        }
        if let [only] = self.fields.as_slice() {
            scope.push_dynamic("value", lookup(only));
        }
        scope
    }
}

impl CompiledRule for RhaiRule {
    fn template(&self) -> &str {
        &self.template
    }

    fn matches(&self, candidate: &DiscriminatorCandidate) -> Result<bool, DiscriminatorError> {
        let evaluation_error = |message: String| DiscriminatorError::TemplateEvaluation {
            template: self.template.clone(),
            dn: candidate.dn.clone(),
            message,
        };

        let mut scope = self.scope(Some(candidate));
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(|e| evaluation_error(e.to_string()))?;

        result.as_bool().map_err(|type_name| {
            evaluation_error(format!("expected a boolean result, got {type_name}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn eval(template: &str, field_names: &[&str], candidate: &DiscriminatorCandidate) -> bool {
        RhaiRuleEngine::new()
            .compile(template, &fields(field_names))
            .unwrap()
            .matches(candidate)
            .unwrap()
    }

    #[test]
    fn test_strip_delimiters() {
        assert_eq!(strip_delimiters("{{ value == 'x' }}"), "value == 'x'");
        assert_eq!(strip_delimiters("  true "), "true");
        assert_eq!(strip_delimiters("{{true}}"), "true");
        assert_eq!(strip_delimiters("{{ half"), "{{ half");
    }

    #[test]
    fn test_single_field_value_shortcut() {
        let candidate = DiscriminatorCandidate::new("uid=a").with_attribute("sn", Some("foo_sn"));
        assert!(eval(r#"{{ value == "foo_sn" }}"#, &["sn"], &candidate));
        assert!(eval(r#"sn == "foo_sn""#, &["sn"], &candidate));
        assert!(!eval(r#"value == "bar_sn""#, &["sn"], &candidate));
    }

    #[test]
    fn test_dn_variable() {
        let candidate = DiscriminatorCandidate::new("uid=a,ou=people");
        assert!(eval(r#"dn.starts_with("uid=a")"#, &[], &candidate));
    }

    #[test]
    fn test_missing_attribute_is_unit() {
        let candidate = DiscriminatorCandidate::new("uid=a").with_attribute("title", None);
        assert!(eval(
            r#"!is_defined(title) || title == "X""#,
            &["title"],
            &candidate
        ));
        assert!(eval("is_missing(title)", &["title"], &candidate));
        assert!(!eval(r#"title == "X""#, &["title"], &candidate));

        let titled = DiscriminatorCandidate::new("uid=b").with_attribute("title", Some("Y"));
        assert!(!eval(
            r#"!is_defined(title) || title == "X""#,
            &["title"],
            &titled
        ));
    }

    #[test]
    fn test_value_is_undefined_with_several_fields() {
        let result = RhaiRuleEngine::new().compile(r#"value == "x""#, &fields(&["sn", "title"]));
        assert!(matches!(
            result,
            Err(DiscriminatorError::TemplateCompile { .. })
        ));
    }

    #[test]
    fn test_unknown_variable_fails_to_compile() {
        let result = RhaiRuleEngine::new().compile("department == 1", &fields(&["sn"]));
        assert!(matches!(
            result,
            Err(DiscriminatorError::TemplateCompile { .. })
        ));
    }

    #[test]
    fn test_jinja_literals_get_rhai_hint() {
        let engine = RhaiRuleEngine::new();

        match engine.compile("{{ value == 'foo_sn' }}", &fields(&["sn"])) {
            Err(DiscriminatorError::TemplateCompile { message, .. }) => {
                assert!(message.contains("double quotes"), "{message}");
            }
            other => panic!("expected TemplateCompile, got {:?}", other.err()),
        }

        match engine.compile("{{ True }}", &fields(&["sn"])) {
            Err(DiscriminatorError::TemplateCompile { message, .. }) => {
                assert!(message.contains("true, false"), "{message}");
            }
            other => panic!("expected TemplateCompile, got {:?}", other.err()),
        }

        match engine.compile("department == 1", &fields(&["sn"])) {
            Err(DiscriminatorError::TemplateCompile { message, .. }) => {
                assert!(!message.contains("Rhai"), "{message}");
            }
            other => panic!("expected TemplateCompile, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_statements_are_rejected() {
        let result = RhaiRuleEngine::new().compile("let x = 1; x == 1", &fields(&["sn"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_non_boolean_result() {
        let rule = RhaiRuleEngine::new()
            .compile("value", &fields(&["sn"]))
            .unwrap();
        let candidate = DiscriminatorCandidate::new("uid=a").with_attribute("sn", Some("x"));
        assert!(matches!(
            rule.matches(&candidate),
            Err(DiscriminatorError::TemplateEvaluation { .. })
        ));
    }

    #[test]
    fn test_operation_limit() {
        let engine = RhaiRuleEngine::with_config(RhaiRuleConfig {
            max_operations: 5,
            ..Default::default()
        });
        let rule = engine
            .compile(r#"dn + dn + dn + dn + dn + dn + dn + dn + dn + dn == """#, &[])
            .unwrap();
        let result = rule.matches(&DiscriminatorCandidate::new("uid=a"));
        assert!(matches!(
            result,
            Err(DiscriminatorError::TemplateEvaluation { .. })
        ));
    }
}
