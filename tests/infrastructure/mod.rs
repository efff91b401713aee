mod chat_punctuation_test;
