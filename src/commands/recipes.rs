use crate::recipes::{Recipe, RecipeStore};

pub async fn list(store: &RecipeStore) {
    print!("{}", list_report(store).await);
}

pub async fn delete(store: &RecipeStore, fingerprint: &str) {
    println!("{}", delete_report(store, fingerprint).await);
}

async fn list_report(store: &RecipeStore) -> String {
    let recipes = store.list().await;
    if recipes.is_empty() {
        return "No recipes saved.\n".to_string();
    }
    recipes
        .iter()
        .map(|recipe| format!("{}\n", summary_line(recipe)))
        .collect()
}

async fn delete_report(store: &RecipeStore, fingerprint: &str) -> String {
    if store.delete(fingerprint).await {
        format!("Deleted recipe {}", fingerprint)
    } else {
        format!("Recipe {} not found", fingerprint)
    }
}

fn summary_line(recipe: &Recipe) -> String {
    let goal: String = recipe.goal_text.chars().take(50).collect();
    format!(
        "  {}  {:30}  {:50}  success={}  steps={}",
        recipe.fingerprint,
        recipe.domain,
        goal,
        recipe.success_rate(),
        recipe.steps.len()
    )
}
