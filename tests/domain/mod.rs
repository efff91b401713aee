mod progress_model_test;
