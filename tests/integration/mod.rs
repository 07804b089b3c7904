mod executor_tests;
mod validator_tests;
