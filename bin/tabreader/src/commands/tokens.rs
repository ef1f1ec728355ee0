use tabreader_core::{generate_token, Paths, TokenStore};

fn load(paths: &Paths) -> anyhow::Result<TokenStore> {
    let path = paths.tokens_file();
    if path.exists() {
        Ok(TokenStore::load(&path)?)
    } else {
        Ok(TokenStore::default())
    }
}

/// Show enough of a token to tell them apart.
fn mask(token: &str) -> String {
    let shown: String = token.chars().take(6).collect();
    if token.chars().count() <= 6 {
        "*".repeat(token.chars().count())
    } else {
        format!("{}…", shown)
    }
}

pub fn list(paths: &Paths) -> anyhow::Result<()> {
    let store = load(paths)?;
    if store.tokens.is_empty() {
        println!("(No tokens. Create one with `tabreader tokens generate`.)");
        return Ok(());
    }
    for token in &store.tokens {
        println!("  {}", mask(token));
    }
    println!();
    println!("{} token(s) in {}", store.tokens.len(), paths.tokens_file().display());
    Ok(())
}

pub fn add(paths: &Paths, token: &str) -> anyhow::Result<()> {
    let mut store = load(paths)?;
    if store.add(token)? {
        store.save(&paths.tokens_file())?;
        println!("✓ Token added");
    } else {
        println!("Token already present");
    }
    Ok(())
}

pub fn remove(paths: &Paths, token: &str) -> anyhow::Result<()> {
    let mut store = load(paths)?;
    if store.remove(token) {
        store.save(&paths.tokens_file())?;
        println!("✓ Token removed");
        Ok(())
    } else {
        anyhow::bail!("token not found")
    }
}

pub fn generate(paths: &Paths) -> anyhow::Result<()> {
    let mut store = load(paths)?;
    let token = generate_token();
    store.add(&token)?;
    store.save(&paths.tokens_file())?;
    println!("{}", token);
    Ok(())
}
