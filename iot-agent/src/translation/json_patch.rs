/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/


//! Patch instruction interpreter over semi-structured JSON documents.

use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Location inside a document, as a sequence of unescaped reference tokens.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub struct JsonPointer {
    tokens: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidPointer(String);

impl Display for InvalidPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "pointer `{}` must be empty or start with `/`", self.0)
    }
}

impl Error for InvalidPointer {}

impl TryFrom<String> for JsonPointer {
    type Error = InvalidPointer;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        JsonPointer::parse(&text)
    }
}

impl JsonPointer {
    pub fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    pub fn parse(text: &str) -> Result<Self, InvalidPointer> {
        if text.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = text.strip_prefix('/') else {
            return Err(InvalidPointer(text.to_string()));
        };
        let tokens = rest
            .split('/')
            .map(|token| token.replace("~1", "/").replace("~0", "~"))
            .collect();
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    fn is_proper_prefix_of(&self, other: &JsonPointer) -> bool {
        self.tokens.len() < other.tokens.len() && other.tokens.starts_with(&self.tokens)
    }
}

impl Display for JsonPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

/// One patch instruction.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchInstruction {
    Add { path: JsonPointer, value: Value },
    Remove { path: JsonPointer },
    Replace { path: JsonPointer, value: Value },
    Copy { from: JsonPointer, path: JsonPointer },
    Move { from: JsonPointer, path: JsonPointer },
    Test { path: JsonPointer, value: Value },
}

impl PatchInstruction {
    pub fn op_name(&self) -> &'static str {
        match self {
            PatchInstruction::Add { .. } => "add",
            PatchInstruction::Remove { .. } => "remove",
            PatchInstruction::Replace { .. } => "replace",
            PatchInstruction::Copy { .. } => "copy",
            PatchInstruction::Move { .. } => "move",
            PatchInstruction::Test { .. } => "test",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum PatchFailure {
    PathNotFound(JsonPointer),
    InvalidIndex(JsonPointer),
    TestFailed(JsonPointer),
    MoveIntoDescendant { from: JsonPointer, path: JsonPointer },
    RootRemoval,
}

impl Display for PatchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PatchFailure::PathNotFound(path) => write!(f, "path `{path}` does not exist"),
            PatchFailure::InvalidIndex(path) => write!(f, "invalid array index at `{path}`"),
            PatchFailure::TestFailed(path) => write!(f, "test failed at `{path}`"),
            PatchFailure::MoveIntoDescendant { from, path } => {
                write!(f, "cannot move `{from}` into its own child `{path}`")
            }
            PatchFailure::RootRemoval => write!(f, "cannot remove the document root"),
        }
    }
}

/// Instruction `index` of the list could not be applied.
#[derive(Debug, PartialEq)]
pub struct PatchApplyError {
    pub index: usize,
    pub op: &'static str,
    pub failure: PatchFailure,
}

impl Display for PatchApplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patch instruction #{} ({}) failed: {}",
            self.index, self.op, self.failure
        )
    }
}

impl Error for PatchApplyError {}

/// Applies `instructions` in order and returns the patched document. The input is never
/// modified, so a failure leaves nothing half-applied.
pub fn apply(document: &Value, instructions: &[PatchInstruction]) -> Result<Value, PatchApplyError> {
    let mut patched = document.clone();
    for (index, instruction) in instructions.iter().enumerate() {
        apply_one(&mut patched, instruction).map_err(|failure| PatchApplyError {
            index,
            op: instruction.op_name(),
            failure,
        })?;
    }
    Ok(patched)
}

fn apply_one(document: &mut Value, instruction: &PatchInstruction) -> Result<(), PatchFailure> {
    match instruction {
        PatchInstruction::Add { path, value } => add(document, path, value.clone()),
        PatchInstruction::Remove { path } => remove(document, path).map(drop),
        PatchInstruction::Replace { path, value } => {
            let target =
                lookup_mut(document, path.tokens()).ok_or_else(|| PatchFailure::PathNotFound(path.clone()))?;
            *target = value.clone();
            Ok(())
        }
        PatchInstruction::Copy { from, path } => {
            let value = lookup(document, from.tokens())
                .cloned()
                .ok_or_else(|| PatchFailure::PathNotFound(from.clone()))?;
            add(document, path, value)
        }
        PatchInstruction::Move { from, path } => {
            if from == path {
                return lookup(document, from.tokens())
                    .map(drop)
                    .ok_or_else(|| PatchFailure::PathNotFound(from.clone()));
            }
            if from.is_proper_prefix_of(path) {
                return Err(PatchFailure::MoveIntoDescendant {
                    from: from.clone(),
                    path: path.clone(),
                });
            }
            let value = remove(document, from)?;
            add(document, path, value)
        }
        PatchInstruction::Test { path, value } => match lookup(document, path.tokens()) {
            Some(actual) if actual == value => Ok(()),
            _ => Err(PatchFailure::TestFailed(path.clone())),
        },
    }
}

fn add(document: &mut Value, path: &JsonPointer, value: Value) -> Result<(), PatchFailure> {
    let Some((last, parent_tokens)) = path.tokens().split_last() else {
        *document = value;
        return Ok(());
    };
    let parent =
        lookup_mut(document, parent_tokens).ok_or_else(|| PatchFailure::PathNotFound(path.clone()))?;

    match parent {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            match parse_index(last) {
                Some(index) if index <= items.len() => {
                    items.insert(index, value);
                    Ok(())
                }
                _ => Err(PatchFailure::InvalidIndex(path.clone())),
            }
        }
        _ => Err(PatchFailure::PathNotFound(path.clone())),
    }
}

fn remove(document: &mut Value, path: &JsonPointer) -> Result<Value, PatchFailure> {
    let (last, parent_tokens) = path.tokens().split_last().ok_or(PatchFailure::RootRemoval)?;
    let not_found = || PatchFailure::PathNotFound(path.clone());

    match lookup_mut(document, parent_tokens).ok_or_else(not_found)? {
        Value::Object(map) => map.remove(last).ok_or_else(not_found),
        Value::Array(items) => match parse_index(last) {
            Some(index) if index < items.len() => Ok(items.remove(index)),
            _ => Err(PatchFailure::InvalidIndex(path.clone())),
        },
        _ => Err(not_found()),
    }
}

// Array indices are plain decimal without leading zeros.
fn parse_index(token: &str) -> Option<usize> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if well_formed {
        token.parse().ok()
    } else {
        None
    }
}

fn lookup<'a>(document: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    tokens.iter().try_fold(document, |current, token| match current {
        Value::Object(map) => map.get(token),
        Value::Array(items) => items.get(parse_index(token)?),
        _ => None,
    })
}

fn lookup_mut<'a>(document: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    tokens.iter().try_fold(document, |current, token| match current {
        Value::Object(map) => map.get_mut(token),
        Value::Array(items) => items.get_mut(parse_index(token)?),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::{apply, JsonPointer, PatchFailure, PatchInstruction};
    use serde_json::{json, Value};

    fn instructions(raw: Value) -> Vec<PatchInstruction> {
        serde_json::from_value(raw).expect("valid instructions")
    }

    #[test]
    fn pointer_unescapes_and_round_trips_through_display() {
        let pointer = JsonPointer::parse("/a~1b/c~0d/0").expect("valid pointer");
        assert_eq!(pointer.tokens(), ["a/b", "c~d", "0"]);
        assert_eq!(pointer.to_string(), "/a~1b/c~0d/0");
        assert!(JsonPointer::parse("no-slash").is_err());
        assert!(JsonPointer::parse("").expect("root").tokens().is_empty());
    }

    #[test]
    fn instructions_run_in_order() {
        let document = json!({"temp": 21, "raw": {"hum": 40}});
        let patch = instructions(json!([
            {"op": "move", "from": "/raw/hum", "path": "/humidity"},
            {"op": "remove", "path": "/raw"},
            {"op": "add", "path": "/unit", "value": "C"},
            {"op": "replace", "path": "/temp", "value": 22},
            {"op": "copy", "from": "/temp", "path": "/temp_copy"},
        ]));

        let patched = apply(&document, &patch).expect("patch applies");

        assert_eq!(
            patched,
            json!({"temp": 22, "humidity": 40, "unit": "C", "temp_copy": 22})
        );
    }

    #[test]
    fn array_add_supports_index_and_append() {
        let document = json!({"list": [1, 3]});
        let patch = instructions(json!([
            {"op": "add", "path": "/list/1", "value": 2},
            {"op": "add", "path": "/list/-", "value": 4},
        ]));

        assert_eq!(apply(&document, &patch).expect("patch applies"), json!({"list": [1, 2, 3, 4]}));
    }

    #[test]
    fn passing_tests_leave_the_document_unchanged() {
        let document = json!({"a": {"b": [1, 2]}, "c": null});
        let patch = instructions(json!([
            {"op": "test", "path": "/a/b/1", "value": 2},
            {"op": "test", "path": "/c", "value": null},
        ]));

        assert_eq!(apply(&document, &patch).expect("tests pass"), document);
    }

    #[test]
    fn failing_test_reports_its_position_and_keeps_input_intact() {
        let document = json!({"a": 1});
        let patch = instructions(json!([
            {"op": "add", "path": "/b", "value": 2},
            {"op": "test", "path": "/a", "value": 5},
        ]));

        let err = apply(&document, &patch).expect_err("test must fail");

        assert_eq!(err.index, 1);
        assert_eq!(err.op, "test");
        assert!(matches!(err.failure, PatchFailure::TestFailed(_)));
        assert_eq!(document, json!({"a": 1}));
    }

    #[test]
    fn add_requires_an_existing_parent() {
        let err = apply(
            &json!({}),
            &instructions(json!([{"op": "add", "path": "/missing/child", "value": 1}])),
        )
        .expect_err("parent is missing");
        assert!(matches!(err.failure, PatchFailure::PathNotFound(_)));
    }

    #[test]
    fn non_additive_operations_fail_on_missing_paths() {
        for raw in [
            json!([{"op": "remove", "path": "/nope"}]),
            json!([{"op": "replace", "path": "/nope", "value": 1}]),
            json!([{"op": "copy", "from": "/nope", "path": "/x"}]),
            json!([{"op": "move", "from": "/nope", "path": "/x"}]),
        ] {
            assert!(apply(&json!({"a": 1}), &instructions(raw)).is_err());
        }
    }

    #[test]
    fn move_into_own_child_is_rejected() {
        let err = apply(
            &json!({"a": {"b": 1}}),
            &instructions(json!([{"op": "move", "from": "/a", "path": "/a/c"}])),
        )
        .expect_err("cannot move into descendant");
        assert!(matches!(err.failure, PatchFailure::MoveIntoDescendant { .. }));
    }

    #[test]
    fn root_can_be_replaced_but_not_removed() {
        let replaced = apply(
            &json!({"a": 1}),
            &instructions(json!([{"op": "replace", "path": "", "value": {"b": 2}}])),
        )
        .expect("root replace");
        assert_eq!(replaced, json!({"b": 2}));

        let err = apply(&json!({"a": 1}), &instructions(json!([{"op": "remove", "path": ""}])))
            .expect_err("root removal");
        assert_eq!(err.failure, PatchFailure::RootRemoval);
    }

    #[test]
    fn leading_zero_indices_are_invalid() {
        let err = apply(
            &json!([1, 2]),
            &instructions(json!([{"op": "remove", "path": "/01"}])),
        )
        .expect_err("leading zero");
        assert!(matches!(err.failure, PatchFailure::InvalidIndex(_)));
    }

    #[test]
    fn unknown_operations_do_not_deserialize() {
        let parsed: Result<Vec<PatchInstruction>, _> =
            serde_json::from_value(json!([{"op": "merge", "path": "/a"}]));
        assert!(parsed.is_err());
    }
}
