mod chat_punctuation;

pub use chat_punctuation::ChatPunctuationRestorer;
