#![allow(dead_code)]

/// Command line assertion utilities
pub fn assert_cmd_contains(cmd: &str, flag: &str) {
    assert!(
        cmd.contains(flag),
        "Expected ffmpeg command to contain '{}' but it didn't.\nCommand: {}",
        flag,
        cmd
    );
}

/// Check if a command string does NOT contain a specific flag
pub fn assert_cmd_not_contains(cmd: &str, flag: &str) {
    assert!(
        !cmd.contains(flag),
        "Expected ffmpeg command to NOT contain '{}' but it did.\nCommand: {}",
        flag,
        cmd
    );
}

/// Check if a command contains a flag with a specific value
pub fn assert_cmd_has_flag_value(cmd: &str, flag: &str, value: &str) {
    let pattern = format!("{} {}", flag, value);
    assert!(
        cmd.contains(&pattern),
        "Expected ffmpeg command to contain '{} {}' but it didn't.\nCommand: {}",
        flag,
        value,
        cmd
    );
}

/// Assert no staging leftovers remain in a directory
pub fn assert_no_partials(dir: &std::path::Path) {
    let leftovers: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".partial."))
        .collect();
    assert!(
        leftovers.is_empty(),
        "Expected no partial files in {} but found {:?}",
        dir.display(),
        leftovers
    );
}
