use std::env;

pub fn env_int(name: &str) -> Option<usize> {
    match env::var(name) {
        Ok(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

pub fn env_str(name: &str) -> Option<String> {
    env::var(name).ok()
}

pub fn env_bool(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(s) if s == "true" || s == "1" => Some(true),
        Ok(s) if s == "false" || s == "0" => Some(false),
        _ => None,
    }
}

pub fn env_list(name: &str) -> Vec<String> {
    match env::var(name) {
        Ok(s) => s
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}
