use crate::constants;

/// Where in the multipart body the parser currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Init,
    Preamble,
    Part,
    Epilogue,
}

/// Parser position plus the two one-shot boundary signals.
///
/// `start` is raised on the first chunk after a delimiter, `end` on a chunk
/// that was itself terminated by a delimiter. Both only describe the chunk
/// most recently passed to [`ParserState::patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParserState {
    stage: Stage,
    start: bool,
    end: bool,
}

impl Default for ParserState {
    fn default() -> Self {
        ParserState {
            stage: Stage::Init,
            start: false,
            end: false,
        }
    }
}

impl ParserState {
    /// Advances the state over the next tokenizer chunk.
    pub(crate) fn patch(self, chunk: &[u8], end: bool) -> ParserState {
        if self.stage == Stage::Init {
            return ParserState {
                stage: Stage::Preamble,
                start: true,
                end,
            };
        }

        let after_delimiter = self.end;
        let stage = match self.stage {
            Stage::Epilogue => Stage::Epilogue,
            _ if after_delimiter && chunk.starts_with(constants::BOUNDARY_EXT.as_bytes()) => Stage::Epilogue,
            Stage::Preamble if !after_delimiter => Stage::Preamble,
            _ => Stage::Part,
        };

        ParserState {
            stage,
            start: after_delimiter,
            end,
        }
    }

    /// Preamble and epilogue bytes are not part content.
    pub(crate) fn should_ignore(&self) -> bool {
        matches!(self.stage, Stage::Preamble | Stage::Epilogue)
    }

    pub(crate) fn started(&self) -> bool {
        self.start
    }

    pub(crate) fn ended(&self) -> bool {
        self.end
    }

    pub(crate) fn is_epilogue(&self) -> bool {
        self.stage == Stage::Epilogue
    }

    #[cfg(test)]
    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }
}
