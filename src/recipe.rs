use std::fs;

use camino::Utf8Path;
use serde_json::{Value, json};

use crate::domain::{RecipeInput, RecipeRef};
use crate::error::StudyError;

/// Loads the local recipe definition used as the default selection.
pub fn load_recipe_file(path: &Utf8Path) -> Result<RecipeRef, StudyError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| StudyError::RecipeRead(path.as_std_path().to_path_buf()))?;
    serde_json::from_str(&content).map_err(|err| StudyError::RecipeParse(err.to_string()))
}

/// Like [`load_recipe_file`] but a missing or broken file only costs the
/// default selection.
pub fn load_default_recipe(path: &Utf8Path) -> Option<RecipeRef> {
    match load_recipe_file(path) {
        Ok(recipe) => Some(recipe),
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "default recipe unavailable");
            None
        }
    }
}

/// Body for `POST /projects/{owner}/{project}/jobs`.
pub fn study_spec(
    recipe: &RecipeRef,
    name: &str,
    description: Option<&str>,
    inputs: &[RecipeInput],
) -> Value {
    let arguments = inputs
        .iter()
        .map(|input| {
            json!({
                "type": "JobArgument",
                "name": input.name,
                "value": input.value,
            })
        })
        .collect::<Vec<_>>();

    let mut spec = json!({
        "type": "Job",
        "source": recipe.source(),
        "name": name,
        "arguments": [arguments],
    });
    if let Some(description) = description {
        spec["description"] = Value::String(description.to_string());
    }
    spec
}
