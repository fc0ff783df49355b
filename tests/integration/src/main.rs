//! Integration Test Harness
//!
//! Runs all integration tests and provides comprehensive reporting.
//!
//! # Usage
//!
//! Run all tests:
//! ```
//! cargo run -p integration-tests
//! ```
//!
//! Run specific test categories:
//! ```
//! cargo test -p integration-tests --test manager_tests
//! cargo test -p integration-tests --test activation_tests
//! cargo test -p integration-tests --test destruction_tests
//! cargo test -p integration-tests --test stress_tests
//! ```
//!
//! Run with increased logging:
//! ```
//! RUST_LOG=debug cargo run -p integration-tests
//! ```

mod common;

use std::process::Command;
use std::time::{Duration, Instant};
use common::{TestResult, TestSuiteResults};

/// Test category
#[derive(Debug, Clone)]
struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Manager Tests",
        description: "Holding, discarding and inactive request gating",
        test_name: "manager_tests",
    },
    TestCategory {
        name: "Activation Tests",
        description: "Servant incarnation, adapter activation, references",
        test_name: "activation_tests",
    },
    TestCategory {
        name: "Destruction Tests",
        description: "Adapter teardown ordering and draining",
        test_name: "destruction_tests",
    },
    TestCategory {
        name: "Stress Tests",
        description: "Concurrent activation and lifecycle races",
        test_name: "stress_tests",
    },
];

fn print_banner() {
    println!(r#"
================================================================================
     ____   ___    _      ___       _            _
    |  _ \ / _ \  / \    |_ _|_ __ | |_ ___  ___| |_
    | |_) | | | |/ _ \    | || '_ \| __/ _ \/ __| __|
    |  __/| |_| / ___ \   | || | | | ||  __/\__ \ |_
    |_|    \___/_/   \_\ |___|_| |_|\__\___||___/\__|

               Object Adapter Integration Test Suite
================================================================================
"#);
}

fn print_test_categories() {
    println!("Test Categories:");
    println!("{}", "-".repeat(80));
    for (i, cat) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, cat.name, cat.description);
    }
    println!("{}", "-".repeat(80));
    println!();
}

fn run_test_category(category: &TestCategory) -> (bool, Duration, String) {
    println!("\n{}", "=".repeat(80));
    println!("Running: {}", category.name);
    println!("{}", "=".repeat(80));

    let start = Instant::now();

    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();

    let duration = start.elapsed();

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            // Print output
            if !stdout.is_empty() {
                println!("{}", stdout);
            }
            if !stderr.is_empty() {
                eprintln!("{}", stderr);
            }

            let success = output.status.success();
            let summary = if success {
                "PASSED".to_string()
            } else {
                format!("FAILED (exit code: {:?})", output.status.code())
            };

            (success, duration, summary)
        }
        Err(e) => {
            (false, duration, format!("Failed to execute: {}", e))
        }
    }
}

fn main() {
    print_banner();
    print_test_categories();

    println!("Starting comprehensive test suite...\n");

    let total_start = Instant::now();
    let mut results = TestSuiteResults::new();

    for category in TEST_CATEGORIES {
        let (passed, duration, details) = run_test_category(category);
        results.add(TestResult {
            name: category.name.to_string(),
            passed,
            duration,
            details,
        });
    }

    let total_duration = total_start.elapsed();

    // Print final summary
    println!("\n{}", "=".repeat(80));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(80));

    let failed = results.failed();
    println!(
        "\nCategories: {} | Passed: {} | Failed: {}",
        results.results.len(),
        results.passed(),
        failed
    );
    println!("Total Duration: {:?} (tests: {:?})", total_duration, results.total_duration());
    println!();

    println!("{:<30} {:<10} {:<15} {}", "Category", "Status", "Duration", "Details");
    println!("{}", "-".repeat(80));

    for result in &results.results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        println!(
            "{:<30} {:<10} {:<15?} {}",
            result.name, status, result.duration, result.details
        );
    }

    println!("{}", "=".repeat(80));

    // Exit with appropriate code
    if failed > 0 {
        println!("\nSome tests failed!");
        std::process::exit(1);
    } else {
        println!("\nAll tests passed!");
        std::process::exit(0);
    }
}
