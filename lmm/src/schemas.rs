//! Hand-authored JSON Schemas for the step response.
//!
//! These are written out explicitly rather than generated: provider "strict
//! schema" modes have uneven `$ref`/`$defs` support, and OpenAI's structured
//! output cannot express `oneOf`, so it gets a flattened variant where the
//! inactive union fields are nullable.

use serde_json::{Value, json};

/// Schema with a `oneOf` action union. Suitable for Anthropic tool input.
pub fn step_response_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "reasoning": {
                "type": "string",
                "minLength": 1,
                "description": "Concise reasoning for the action"
            },
            "action": {
                "description": "The action to take",
                "oneOf": [
                    {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "action_type": {"type": "string", "enum": ["crop"]},
                            "x": {"type": "integer", "minimum": 0},
                            "y": {"type": "integer", "minimum": 0},
                            "width": {"type": "integer", "exclusiveMinimum": 0},
                            "height": {"type": "integer", "exclusiveMinimum": 0}
                        },
                        "required": ["action_type", "x", "y", "width", "height"]
                    },
                    {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "action_type": {"type": "string", "enum": ["answer"]},
                            "answer_text": {"type": "string", "minLength": 1}
                        },
                        "required": ["action_type", "answer_text"]
                    }
                ]
            }
        },
        "required": ["reasoning", "action"]
    })
}

/// Flattened schema for OpenAI structured output: one action object carrying
/// every union field, the inactive side nulled.
pub fn step_response_schema_flat() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "reasoning": {
                "type": "string",
                "minLength": 1,
                "description": "Concise reasoning for the action"
            },
            "action": {
                "type": "object",
                "additionalProperties": false,
                "description": "Action: crop (x/y/width/height) or answer (text)",
                "properties": {
                    "action_type": {
                        "type": "string",
                        "enum": ["crop", "answer"],
                        "description": "crop=zoom region, answer=final response"
                    },
                    "x": {
                        "type": ["integer", "null"],
                        "minimum": 0,
                        "description": "X coord (crop only, null for answer)"
                    },
                    "y": {
                        "type": ["integer", "null"],
                        "minimum": 0,
                        "description": "Y coord (crop only, null for answer)"
                    },
                    "width": {
                        "type": ["integer", "null"],
                        "exclusiveMinimum": 0,
                        "description": "Width (crop only, null for answer)"
                    },
                    "height": {
                        "type": ["integer", "null"],
                        "exclusiveMinimum": 0,
                        "description": "Height (crop only, null for answer)"
                    },
                    "answer_text": {
                        "type": ["string", "null"],
                        "minLength": 1,
                        "description": "Final answer (answer only, null for crop)"
                    }
                },
                "required": ["action_type", "x", "y", "width", "height", "answer_text"]
            }
        },
        "required": ["reasoning", "action"]
    })
}
