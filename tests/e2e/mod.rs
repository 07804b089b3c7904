mod limits_tests;
mod scenario_tests;
