mod launch_tests;
mod netcat_tests;
