//! HCL inventories, written as top-level `group` blocks:
//!
//! ```hcl
//! ntp = "pool.ntp.org"
//!
//! group "kubernetes" {
//!   env = "prod"
//!   host "node1" {
//!     ansible_host = "10.0.0.1"
//!   }
//!   group "workers" {}
//! }
//! ```
//!
//! Top-level attributes become variables of `all`.

use std::ops::Range;

use hcl::eval::{Context, Evaluate};
use hcl_edit::{
    expr::Expression,
    structure::{Block, BlockLabel, Structure},
    Span,
};
use invload_common::{
    error::{Error, ErrorKind, ErrorLocation, Origin},
    value::{VarMap, VarValue},
};

use crate::group::{ChildRef, GroupConfig, HostEntry, RawInventory};

pub fn parse(origin: &Origin) -> Result<RawInventory, Error> {
    let body = hcl_edit::parser::parse_body(&origin.data)
        .map_err(|e| Error::from_hcl(e, origin.path.clone()))?;

    let parser = BlockParser {
        origin,
        ctx: Context::new(),
    };
    let mut raw = RawInventory::new();
    let mut all_vars = Vec::new();

    for structure in body.iter() {
        match structure {
            Structure::Attribute(a) => {
                let value = parser.evaluate(&a.value)?;
                all_vars.push((a.key.to_string(), value, parser.location(&a.key.span())));
            }
            Structure::Block(block) => {
                if block.ident.as_str() != "group" {
                    return origin
                        .error(
                            ErrorKind::Parse,
                            format!(
                                "unexpected block {}, only group blocks are allowed",
                                block.ident.as_str()
                            ),
                            &block.ident.span(),
                        )
                        .err();
                }
                let group = parser.parse_group(block)?;
                raw.insert(group)?;
            }
        }
    }

    if !all_vars.is_empty() {
        let all = raw.entry("all", None);
        for (key, value, location) in all_vars {
            all.set_var(key, value, location)?;
        }
    }

    Ok(raw)
}

struct BlockParser<'a> {
    origin: &'a Origin,
    ctx: Context<'a>,
}

impl BlockParser<'_> {
    fn parse_group(&self, block: &Block) -> Result<GroupConfig, Error> {
        let name = self.label(block, "group")?;
        let mut group = GroupConfig::new(name, self.location(&block.labels[0].span()));

        for structure in block.body.iter() {
            match structure {
                Structure::Attribute(a) => {
                    let value = self.evaluate(&a.value)?;
                    group.set_var(a.key.to_string(), value, self.location(&a.key.span()))?;
                }
                Structure::Block(block) => match block.ident.as_str() {
                    "host" => group.add_host(self.parse_host(block)?)?,
                    "group" => group.add_child(self.parse_child(block)?)?,
                    _ => {
                        return self
                            .origin
                            .error(
                                ErrorKind::Parse,
                                "you can only have host or group",
                                &block.ident.span(),
                            )
                            .err()
                    }
                },
            }
        }

        Ok(group)
    }

    fn parse_host(&self, block: &Block) -> Result<HostEntry, Error> {
        let name = self.label(block, "host")?;
        let mut vars = VarMap::new();
        for structure in block.body.iter() {
            match structure {
                Structure::Attribute(a) => {
                    if vars.contains_key(a.key.as_str()) {
                        return self
                            .origin
                            .error(
                                ErrorKind::Schema,
                                format!("variable {} is set twice for host {name}", a.key.as_str()),
                                &a.key.span(),
                            )
                            .err();
                    }
                    vars.insert(a.key.to_string(), self.evaluate(&a.value)?);
                }
                Structure::Block(inner) => {
                    return self
                        .origin
                        .error(
                            ErrorKind::Parse,
                            format!("host {name} can't contain blocks"),
                            &inner.ident.span(),
                        )
                        .err()
                }
            }
        }

        Ok(HostEntry {
            name: name.to_string(),
            vars,
            location: self.location(&block.labels[0].span()),
        })
    }

    fn parse_child(&self, block: &Block) -> Result<ChildRef, Error> {
        let name = self.label(block, "group")?;
        if block.body.iter().next().is_some() {
            return self
                .origin
                .error(
                    ErrorKind::Parse,
                    format!("group {name} is a reference here, define its content in its own group block"),
                    &block.labels[0].span(),
                )
                .err();
        }
        Ok(ChildRef {
            name: name.to_string(),
            location: self.location(&block.labels[0].span()),
        })
    }

    fn label<'b>(&self, block: &'b Block, what: &str) -> Result<&'b str, Error> {
        if block.labels.is_empty() {
            return self
                .origin
                .error(
                    ErrorKind::Parse,
                    format!("{what} name doesn't exist"),
                    &block.ident.span(),
                )
                .err();
        }
        if block.labels.len() > 1 {
            return self
                .origin
                .error(
                    ErrorKind::Parse,
                    format!("{what} should only have one name"),
                    &block.labels[1].span(),
                )
                .err();
        }
        let BlockLabel::String(name) = &block.labels[0] else {
            return self
                .origin
                .error(
                    ErrorKind::Parse,
                    format!("{what} name should be a string"),
                    &block.labels[0].span(),
                )
                .err();
        };
        Ok(name.as_str())
    }

    fn evaluate(&self, expr: &Expression) -> Result<VarValue, Error> {
        let span = expr.span();
        let expr: hcl::Expression = expr.to_owned().into();
        let v: hcl::Value = expr.evaluate(&self.ctx).map_err(|e| {
            self.origin
                .error(ErrorKind::Parse, e.to_string().replace('\n', " "), &span)
        })?;
        value_from_hcl(v).map_err(|e| self.origin.error(ErrorKind::Parse, e, &span))
    }

    fn location(&self, span: &Option<Range<usize>>) -> Option<ErrorLocation> {
        span.clone().map(|span| self.origin.location(span))
    }
}

fn value_from_hcl(value: hcl::Value) -> Result<VarValue, String> {
    let value = match value {
        hcl::Value::Null => VarValue::Null,
        hcl::Value::Bool(b) => VarValue::Bool(b),
        hcl::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                VarValue::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                VarValue::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(VarValue::from_f64)
                    .ok_or_else(|| format!("number {n} can't be represented"))?
            }
        }
        hcl::Value::String(s) => VarValue::String(s),
        hcl::Value::Array(items) => VarValue::List(
            items
                .into_iter()
                .map(value_from_hcl)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        hcl::Value::Object(map) => {
            let mut vars = VarMap::new();
            for (key, value) in map {
                vars.insert(key, value_from_hcl(value)?);
            }
            VarValue::Map(vars)
        }
    };
    Ok(value)
}
